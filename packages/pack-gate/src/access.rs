//! Order access validation. Consults the ledger on every call; nothing cached.

use crate::clock::Clock;
use crate::ledger::{OrderLedger, OrderQuery, OrderRecord};
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    NoValidOrder,
    AccessExpired,
}

impl AccessDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDenial::NoValidOrder => "no_valid_order",
            AccessDenial::AccessExpired => "access_expired",
        }
    }
}

impl From<AccessDenial> for Error {
    fn from(denial: AccessDenial) -> Self {
        Error::Forbidden(denial.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(OrderRecord),
    Denied(AccessDenial),
}

impl AccessDecision {
    /// Granted order, or the denial as a `Forbidden` error.
    pub fn into_result(self) -> Result<OrderRecord, Error> {
        match self {
            AccessDecision::Granted(order) => Ok(order),
            AccessDecision::Denied(denial) => Err(denial.into()),
        }
    }
}

pub struct OrderAccessValidator {
    ledger: Arc<dyn OrderLedger>,
    max_access_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl OrderAccessValidator {
    /// `max_access_age = None` disables the staleness cutoff.
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        max_access_age: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            max_access_age,
            clock,
        }
    }

    pub async fn check_access(
        &self,
        user_id: &str,
        pack_id: &str,
        order_id: Option<&str>,
    ) -> Result<AccessDecision, Error> {
        let query = OrderQuery {
            buyer_id: user_id,
            pack_id,
            order_id,
        };
        let orders = self.ledger.find_orders(query).await?;

        let selected = orders
            .into_iter()
            .filter(|o| query.matches(o) && o.status.grants_access())
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.order_id.cmp(&b.order_id))
            });

        let Some(order) = selected else {
            debug!(user_id, pack_id, "No allow-listed order");
            return Ok(AccessDecision::Denied(AccessDenial::NoValidOrder));
        };

        if let Some(max_age) = self.max_access_age {
            let age = self.clock.now_secs().saturating_sub(order.created_at);
            if age > max_age.as_secs() {
                debug!(user_id, pack_id, order_id = %order.order_id, age, "Access window elapsed");
                return Ok(AccessDecision::Denied(AccessDenial::AccessExpired));
            }
        }

        Ok(AccessDecision::Granted(order))
    }
}
