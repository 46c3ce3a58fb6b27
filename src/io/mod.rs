pub mod cds;
pub mod equity;
pub mod table;

pub use cds::{load_cds, tickers, CdsQuote};
pub use equity::{load_or_fetch_equity_adj_close, EquityOrigin};
pub use table::{read_table, read_table_columns, RawTable, TableFormat};
