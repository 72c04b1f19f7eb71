//! Balancer (spec §4.12 — C12): arbitrates a shared 0-100 resource between
//! competing PWM-driven clients, scaling every request down proportionally
//! when the sum of requests exceeds what's available.

use crate::ids::ObjectId;
use crate::object::BalancerIface;
use std::collections::BTreeMap;

/// One tick's outstanding request from a client, recorded so the next
/// client's request can be weighed against it.
#[derive(Default)]
pub struct Balancer {
    requests: BTreeMap<ObjectId, u8>,
    granted: BTreeMap<ObjectId, u8>,
}

impl Balancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests accumulate within a tick; callers (`ActuatorPwm`, via its
    /// `Balanced` constraint) must call [`Balancer::settle`] once all
    /// clients have registered a request for that tick, then re-read their
    /// grant with [`Balancer::granted`].
    fn total_requested(&self) -> u32 {
        self.requests.values().map(|&v| v as u32).sum()
    }

    /// Scales every outstanding request down proportionally if their sum
    /// exceeds 100; leaves them untouched otherwise.
    pub fn settle(&mut self) {
        let total = self.total_requested();
        self.granted.clear();
        if total <= 100 {
            for (&id, &req) in &self.requests {
                self.granted.insert(id, req);
            }
        } else {
            for (&id, &req) in &self.requests {
                let scaled = (req as u32 * 100 / total) as u8;
                self.granted.insert(id, scaled);
            }
        }
    }

    pub fn granted(&self, client: ObjectId) -> u8 {
        self.granted.get(&client).copied().unwrap_or(0)
    }
}

impl BalancerIface for Balancer {
    /// Registers `requested` for `client` and immediately re-settles so a
    /// single-client caller (the common case: one `request` per tick, then
    /// read back) doesn't need to call `settle` itself.
    fn request(&mut self, client: ObjectId, requested: u8) -> u8 {
        self.requests.insert(client, requested);
        self.settle();
        self.granted(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_client_gets_full_request_under_100() {
        let mut b = Balancer::new();
        assert_eq!(b.request(ObjectId(1), 60), 60);
    }

    #[test]
    fn two_clients_over_budget_scale_down_proportionally() {
        let mut b = Balancer::new();
        b.request(ObjectId(1), 80);
        let granted2 = b.request(ObjectId(2), 80);
        // total requested 160, budget 100: each client scaled to 50%
        assert_eq!(granted2, 50);
        assert_eq!(b.granted(ObjectId(1)), 50);
    }

    #[test]
    fn stale_requests_are_dropped_by_not_re_requesting() {
        let mut b = Balancer::new();
        b.request(ObjectId(1), 50);
        b.request(ObjectId(2), 50);
        // client 1 doesn't request again; only client 2 remains active
        b.requests.remove(&ObjectId(1));
        b.settle();
        assert_eq!(b.granted(ObjectId(2)), 50);
    }
}
