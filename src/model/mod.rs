pub mod frame;
pub mod panel;

pub use frame::{Series, WideFrame};
pub use panel::{Panel, PanelRow};
