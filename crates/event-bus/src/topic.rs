//! Topic naming: `ecommerce.{domain}.{action}` and `ecommerce.dlq.{domain}`.

const PREFIX: &str = "ecommerce";

/// A broker topic identified by domain and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    domain: &'static str,
    action: &'static str,
}

impl Topic {
    pub const fn new(domain: &'static str, action: &'static str) -> Self {
        Self { domain, action }
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Full topic name, e.g. `ecommerce.checkout.completed`.
    pub fn name(&self) -> String {
        format!("{PREFIX}.{}.{}", self.domain, self.action)
    }

    /// Event type carried in the envelope, e.g. `checkout.completed`.
    pub fn event_type(&self) -> String {
        format!("{}.{}", self.domain, self.action)
    }

    /// Dead-letter topic of this topic's domain.
    pub fn dead_letter(&self) -> String {
        dead_letter_topic(self.domain)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PREFIX}.{}.{}", self.domain, self.action)
    }
}

/// Dead-letter topic name for a domain.
pub fn dead_letter_topic(domain: &str) -> String {
    format!("{PREFIX}.dlq.{domain}")
}

pub mod topics {
    use super::Topic;

    pub const CHECKOUT_STARTED: Topic = Topic::new("checkout", "started");
    pub const CHECKOUT_COMPLETED: Topic = Topic::new("checkout", "completed");
    pub const CHECKOUT_FAILED: Topic = Topic::new("checkout", "failed");

    pub const INVENTORY_RESERVED: Topic = Topic::new("inventory", "reserved");
    pub const INVENTORY_RELEASED: Topic = Topic::new("inventory", "released");

    pub const ORDER_CREATED: Topic = Topic::new("order", "created");
    pub const ORDER_CANCELED: Topic = Topic::new("order", "canceled");

    pub const PAYMENT_SUCCEEDED: Topic = Topic::new("payment", "succeeded");
    pub const PAYMENT_FAILED: Topic = Topic::new("payment", "failed");
    pub const PAYMENT_REFUNDED: Topic = Topic::new("payment", "refunded");
}
