use serde::{Deserialize, Serialize};

/// Stockout risk band derived from days-to-stockout plus the reorder-point
/// rule. The derive order gives the sort priority: high sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    High,
    Medium,
    Low,
    None,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::High => "high",
            RiskBand::Medium => "medium",
            RiskBand::Low => "low",
            RiskBand::None => "none",
        }
    }

    /// Band for a positive-velocity product.
    pub fn from_days(days_to_stockout: f64) -> Self {
        if days_to_stockout <= 7.0 {
            RiskBand::High
        } else if days_to_stockout <= 14.0 {
            RiskBand::Medium
        } else if days_to_stockout <= 30.0 {
            RiskBand::Low
        } else {
            RiskBand::None
        }
    }

    /// Reorder-point upgrade: a product at or below its reorder point is
    /// never `none`; `low` stays `low`, everything sharper is untouched.
    pub fn with_reorder_bump(self, on_hand: f64, reorder_point: Option<i64>) -> Self {
        match reorder_point {
            Some(rp) if on_hand <= rp as f64 && self == RiskBand::None => RiskBand::Medium,
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityStrategy {
    Latest,
    Conservative,
}

impl VelocityStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VelocityStrategy::Latest => "latest",
            VelocityStrategy::Conservative => "conservative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(VelocityStrategy::Latest),
            "conservative" => Some(VelocityStrategy::Conservative),
            _ => None,
        }
    }
}

/// Select a velocity from the rolling windows according to the strategy.
/// Returns the chosen velocity and its source label (`7d`/`30d`/`56d`,
/// or `none` when no window is positive).
pub fn choose_velocity(
    strategy: VelocityStrategy,
    v7: Option<f64>,
    v30: Option<f64>,
    v56: Option<f64>,
) -> (Option<f64>, &'static str) {
    let labeled = [(v7, "7d"), (v30, "30d"), (v56, "56d")];
    match strategy {
        VelocityStrategy::Latest => {
            for (v, src) in labeled {
                if let Some(v) = v {
                    if v > 0.0 {
                        return (Some(v), src);
                    }
                }
            }
            (None, "none")
        }
        VelocityStrategy::Conservative => {
            let mut best: Option<(f64, &'static str)> = None;
            for (v, src) in labeled {
                if let Some(v) = v {
                    if v > 0.0 && best.map_or(true, |(b, _)| v < b) {
                        best = Some((v, src));
                    }
                }
            }
            match best {
                Some((v, src)) => (Some(v), src),
                None => (None, "none"),
            }
        }
    }
}
