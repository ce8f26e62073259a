//! Built-in factor templates.

use super::traits::{FactorTemplate, ParamSpec, SignalInput};
use crate::engines::generation::logic::{Comparator, Connective, LogicExpr, Operand};
use crate::types::FactorCategory;

/// Template described entirely by data
pub struct BuiltinFactor {
    alias: &'static str,
    ui_name: &'static str,
    category: FactorCategory,
    parameters: Vec<ParamSpec>,
    inputs: Vec<SignalInput>,
    logic: LogicExpr,
}

impl BuiltinFactor {
    pub fn new(
        alias: &'static str,
        ui_name: &'static str,
        category: FactorCategory,
        parameters: Vec<ParamSpec>,
        inputs: Vec<SignalInput>,
        logic: LogicExpr,
    ) -> Self {
        Self {
            alias,
            ui_name,
            category,
            parameters,
            inputs,
            logic,
        }
    }
}

impl FactorTemplate for BuiltinFactor {
    fn alias(&self) -> &'static str {
        self.alias
    }

    fn ui_name(&self) -> &'static str {
        self.ui_name
    }

    fn category(&self) -> FactorCategory {
        self.category
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        self.parameters.clone()
    }

    fn inputs(&self) -> Vec<SignalInput> {
        self.inputs.clone()
    }

    fn base_logic(&self) -> LogicExpr {
        self.logic.clone()
    }
}

fn input(name: &str) -> Operand {
    Operand::Input(name.to_string())
}

pub fn rsi() -> BuiltinFactor {
    BuiltinFactor::new(
        "rsi",
        "Relative Strength Index",
        FactorCategory::Momentum,
        vec![ParamSpec::int("period", 14, 5, 50)],
        vec![SignalInput::new("rsi", 0.0, 100.0)],
        LogicExpr::input_vs_const("rsi", Comparator::Lt, 30.0),
    )
}

pub fn rate_of_change() -> BuiltinFactor {
    BuiltinFactor::new(
        "roc",
        "Rate of Change",
        FactorCategory::Momentum,
        vec![
            ParamSpec::int("period", 12, 2, 60),
            ParamSpec::float("smoothing", 0.3, 0.0, 1.0),
        ],
        vec![SignalInput::new("roc", -0.2, 0.2)],
        LogicExpr::input_vs_const("roc", Comparator::Gt, 0.0),
    )
}

pub fn price_to_moving_average() -> BuiltinFactor {
    BuiltinFactor::new(
        "price_to_sma",
        "Price relative to moving average",
        FactorCategory::Value,
        vec![ParamSpec::int("period", 50, 10, 200)],
        vec![
            SignalInput::new("close", 0.0, 1_000.0),
            SignalInput::new("sma", 0.0, 1_000.0),
            SignalInput::new("sma_distance", -0.3, 0.3),
        ],
        LogicExpr::compare(input("close"), Comparator::Lt, input("sma")),
    )
}

pub fn mean_reversion_band() -> BuiltinFactor {
    BuiltinFactor::new(
        "zscore_band",
        "Z-score mean reversion band",
        FactorCategory::Value,
        vec![
            ParamSpec::int("lookback", 20, 5, 120),
            ParamSpec::float("width", 2.0, 0.5, 4.0),
        ],
        vec![SignalInput::new("zscore", -4.0, 4.0)],
        LogicExpr::input_vs_const("zscore", Comparator::Lt, -2.0),
    )
}

pub fn trend_strength() -> BuiltinFactor {
    BuiltinFactor::new(
        "adx_trend",
        "Average Directional Index trend filter",
        FactorCategory::Quality,
        vec![ParamSpec::int("period", 14, 7, 50)],
        vec![SignalInput::new("adx", 0.0, 100.0)],
        LogicExpr::input_vs_const("adx", Comparator::Gt, 25.0),
    )
}

pub fn volatility_filter() -> BuiltinFactor {
    BuiltinFactor::new(
        "atr_filter",
        "Average True Range volatility filter",
        FactorCategory::Risk,
        vec![
            ParamSpec::int("period", 14, 5, 50),
            ParamSpec::float("multiplier", 2.0, 0.5, 5.0),
        ],
        vec![SignalInput::new("atr_pct", 0.0, 0.2)],
        LogicExpr::input_vs_const("atr_pct", Comparator::Lt, 0.05),
    )
}

pub fn drawdown_guard() -> BuiltinFactor {
    BuiltinFactor::new(
        "drawdown_guard",
        "Equity drawdown guard",
        FactorCategory::Risk,
        vec![ParamSpec::float("max_drawdown", 0.15, 0.02, 0.5)],
        vec![SignalInput::new("drawdown", 0.0, 1.0)],
        LogicExpr::compare(input("drawdown"), Comparator::Lt, Operand::Param("max_drawdown".into())),
    )
}

pub fn threshold_entry() -> BuiltinFactor {
    BuiltinFactor::new(
        "threshold_entry",
        "Signal threshold entry",
        FactorCategory::Entry,
        vec![
            ParamSpec::int("confirm_bars", 1, 1, 5),
            ParamSpec::choice("side", "long", &["long", "short"]),
        ],
        vec![
            SignalInput::new("signal", -1.0, 1.0),
            SignalInput::new("volume_ratio", 0.0, 5.0),
        ],
        LogicExpr::Composite {
            connective: Connective::And,
            clauses: vec![LogicExpr::input_vs_const("signal", Comparator::Gt, 0.5)],
        },
    )
}

pub fn breakout_entry() -> BuiltinFactor {
    BuiltinFactor::new(
        "breakout_entry",
        "Channel breakout entry",
        FactorCategory::Entry,
        vec![ParamSpec::int("lookback", 20, 5, 100)],
        vec![
            SignalInput::new("close", 0.0, 1_000.0),
            SignalInput::new("channel_high", 0.0, 1_000.0),
            SignalInput::new("breakout_pct", -0.1, 0.1),
        ],
        LogicExpr::compare(input("close"), Comparator::Gt, input("channel_high")),
    )
}

pub fn stop_target_exit() -> BuiltinFactor {
    BuiltinFactor::new(
        "stop_target_exit",
        "Stop-loss / take-profit exit",
        FactorCategory::Exit,
        vec![
            ParamSpec::float("stop_pct", 0.02, 0.005, 0.2),
            ParamSpec::float("target_pct", 0.04, 0.01, 0.5),
        ],
        vec![SignalInput::new("pnl_pct", -0.5, 0.5)],
        LogicExpr::Composite {
            connective: Connective::Or,
            clauses: vec![
                LogicExpr::input_vs_const("pnl_pct", Comparator::Lt, -0.02),
                LogicExpr::input_vs_const("pnl_pct", Comparator::Gt, 0.04),
            ],
        },
    )
}

pub fn time_exit() -> BuiltinFactor {
    BuiltinFactor::new(
        "time_exit",
        "Holding period exit",
        FactorCategory::Exit,
        vec![ParamSpec::int("max_bars", 20, 1, 200)],
        vec![SignalInput::new("bars_held", 0.0, 200.0)],
        LogicExpr::compare(input("bars_held"), Comparator::Ge, Operand::Param("max_bars".into())),
    )
}

pub fn session_filter() -> BuiltinFactor {
    BuiltinFactor::new(
        "session_filter",
        "Trading session filter",
        FactorCategory::Other,
        vec![
            ParamSpec::int("start_hour", 9, 0, 23),
            ParamSpec::int("end_hour", 16, 0, 23),
        ],
        vec![SignalInput::new("hour", 0.0, 23.0)],
        LogicExpr::Composite {
            connective: Connective::And,
            clauses: vec![
                LogicExpr::compare(input("hour"), Comparator::Ge, Operand::Param("start_hour".into())),
                LogicExpr::compare(input("hour"), Comparator::Lt, Operand::Param("end_hour".into())),
            ],
        },
    )
}

pub fn builtin_factors() -> Vec<BuiltinFactor> {
    vec![
        rsi(),
        rate_of_change(),
        price_to_moving_average(),
        mean_reversion_band(),
        trend_strength(),
        volatility_filter(),
        drawdown_guard(),
        threshold_entry(),
        breakout_entry(),
        stop_target_exit(),
        time_exit(),
        session_filter(),
    ]
}
