use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Ordered,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Pending => "pending",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "pending" => Some(PurchaseOrderStatus::Pending),
            "ordered" => Some(PurchaseOrderStatus::Ordered),
            "received" => Some(PurchaseOrderStatus::Received),
            "cancelled" => Some(PurchaseOrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Drafts are fully mutable and deletable. Every other state only
    /// advances forward through the lifecycle.
    pub fn is_mutable(&self) -> bool {
        *self == PurchaseOrderStatus::Draft
    }

    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        match (self, next) {
            (Draft, Pending) | (Draft, Ordered) | (Draft, Cancelled) => true,
            (Pending, Ordered) | (Pending, Cancelled) => true,
            (Ordered, Received) | (Ordered, Cancelled) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PurchaseOrderStatus::*;

    #[test]
    fn lifecycle_is_forward_only() {
        assert!(Draft.can_transition_to(Ordered));
        assert!(Ordered.can_transition_to(Received));
        assert!(!Received.can_transition_to(Draft));
        assert!(!Cancelled.can_transition_to(Ordered));
        assert!(Draft.is_mutable());
        assert!(!Ordered.is_mutable());
    }
}
