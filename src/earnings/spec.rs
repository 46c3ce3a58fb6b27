use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Forecast horizons, in output column order.
pub const HORIZONS: [&str; 5] = ["q1", "q2", "q3", "y1", "y2"];

/// Firm ratio characteristics fed to every horizon.
pub const RATIO_CHARACTERISTICS: [&str; 67] = [
    "CAPEI", "bm", "evm", "pe_exi", "pe_inc", "ps", "pcf", "dpr", "npm", "opmbd", "opmad", "gpm",
    "ptpm", "cfm", "roa", "roe", "roce", "efftax", "aftret_eq", "aftret_invcapx", "aftret_equity",
    "pretret_noa", "pretret_earnat", "GProf", "equity_invcap", "debt_invcap", "totdebt_invcap",
    "capital_ratio", "int_debt", "int_totdebt", "cash_lt", "invt_act", "rect_act", "debt_at",
    "debt_ebitda", "short_debt", "curr_debt", "lt_debt", "profit_lct", "ocf_lct", "cash_debt",
    "fcf_ocf", "lt_ppent", "dltt_be", "debt_assets", "debt_capital", "de_ratio", "intcov",
    "intcov_ratio", "cash_ratio", "quick_ratio", "curr_ratio", "cash_conversion", "inv_turn",
    "at_turn", "rect_turn", "pay_turn", "sale_invcap", "sale_equity", "sale_nwc", "rd_sale",
    "adv_sale", "staff_sale", "accrual", "ptb", "PEG_trailing", "divyield",
];

pub const MACRO_SERIES: [&str; 4] = ["RGDP", "RCON", "INDPROD", "UNEMP"];

/// Whether lagged realized EPS may come from the same horizon (look-ahead) or
/// only from the nearest horizon already announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LookaheadMode {
    #[serde(rename = "wLAB")]
    WithLookahead,
    #[default]
    #[serde(rename = "woLAB")]
    WithoutLookahead,
}

impl LookaheadMode {
    pub fn tag(self) -> &'static str {
        match self {
            LookaheadMode::WithLookahead => "wLAB",
            LookaheadMode::WithoutLookahead => "woLAB",
        }
    }

    /// Default file name for this mode's forecast table.
    pub fn forecast_file_stem(self) -> &'static str {
        match self {
            LookaheadMode::WithLookahead => "NN_with_lookahead_raw",
            LookaheadMode::WithoutLookahead => "NN_wo_lookahead_raw",
        }
    }

    /// File name of the random-forest baseline trained under the same mode.
    pub fn rf_file_stem(self) -> &'static str {
        match self {
            LookaheadMode::WithLookahead => "RF_with_lookahead_raw_005",
            LookaheadMode::WithoutLookahead => "RF_wo_lookahead_raw_005",
        }
    }
}

impl fmt::Display for LookaheadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LookaheadMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wLAB" => Ok(LookaheadMode::WithLookahead),
            "woLAB" => Ok(LookaheadMode::WithoutLookahead),
            other => bail!("invalid mode `{}`: expected wLAB or woLAB", other),
        }
    }
}

/// One horizon's forecasting task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSpec {
    pub horizon: String,
    pub y_col: String,
    pub af_col: String,
    pub ann_date_col: String,
    pub x_cols: Vec<String>,
}

impl ForecastSpec {
    /// Every numeric column this spec reads: features, target, analyst forecast.
    pub fn numeric_columns(&self) -> Vec<String> {
        let mut cols = self.x_cols.clone();
        for extra in [&self.y_col, &self.af_col] {
            if !cols.contains(extra) {
                cols.push(extra.clone());
            }
        }
        cols
    }
}

fn lagged_eps_column(horizon: &str, mode: LookaheadMode) -> String {
    let source = match (mode, horizon) {
        (LookaheadMode::WithoutLookahead, "q2" | "q3") => "q1",
        (LookaheadMode::WithoutLookahead, "y2") => "y1",
        _ => horizon,
    };
    format!("EPS_true_l1_{source}")
}

pub fn build_specs(mode: LookaheadMode) -> Vec<ForecastSpec> {
    HORIZONS
        .iter()
        .map(|&h| {
            let mut x_cols: Vec<String> = RATIO_CHARACTERISTICS.iter().map(|c| c.to_string()).collect();
            x_cols.push("ret".to_string());
            x_cols.push("prc".to_string());
            x_cols.push(lagged_eps_column(h, mode));
            x_cols.push(format!("EPS_ana_{h}"));
            x_cols.extend(MACRO_SERIES.iter().map(|c| c.to_string()));
            ForecastSpec {
                horizon: h.to_string(),
                y_col: format!("EPS_true_{h}"),
                af_col: format!("EPS_ana_{h}"),
                ann_date_col: format!("ANNDATS_{h}"),
                x_cols,
            }
        })
        .collect()
}
