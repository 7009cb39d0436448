use serde::{Deserialize, Serialize};

/// Inventory movement kinds. Movements are append-only; on-hand stock is
/// always derived by summing signed quantities, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Adjust,
    Transfer,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjust => "adjust",
            MovementType::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementType::In),
            "out" => Some(MovementType::Out),
            "adjust" => Some(MovementType::Adjust),
            "transfer" => Some(MovementType::Transfer),
            _ => None,
        }
    }

    /// Signed contribution of a movement to on-hand stock. `transfer` rows
    /// net to zero at the product level (stock moves between locations).
    pub fn signed_delta(&self, quantity: i64) -> i64 {
        match self {
            MovementType::In | MovementType::Adjust => quantity,
            MovementType::Out => -quantity,
            MovementType::Transfer => 0,
        }
    }
}

/// Normalize a movement at the write boundary. Adjustments must be
/// non-negative; a negative adjustment is recorded as `out` instead, so
/// the on-hand derivation can treat `adjust` as strictly additive.
pub fn normalize_movement(movement_type: MovementType, quantity: i64) -> (MovementType, i64) {
    if movement_type == MovementType::Adjust && quantity < 0 {
        (MovementType::Out, -quantity)
    } else {
        (movement_type, quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_deltas() {
        assert_eq!(MovementType::In.signed_delta(5), 5);
        assert_eq!(MovementType::Adjust.signed_delta(3), 3);
        assert_eq!(MovementType::Out.signed_delta(4), -4);
        assert_eq!(MovementType::Transfer.signed_delta(9), 0);
    }

    #[test]
    fn negative_adjust_flips_to_out() {
        assert_eq!(
            normalize_movement(MovementType::Adjust, -7),
            (MovementType::Out, 7)
        );
        assert_eq!(
            normalize_movement(MovementType::Adjust, 7),
            (MovementType::Adjust, 7)
        );
    }
}
