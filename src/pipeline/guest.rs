use crate::store::{ClientState, StoreError, GUEST_USED_KEY};

pub const GUEST_LIMIT_MESSAGE: &str =
    "You've used your free analysis. Sign up for a free account to keep decoding your pet's behavior.";

/// One free analysis per device for callers without an account.
pub struct GuestGate<'a> {
    state: &'a ClientState,
}

impl<'a> GuestGate<'a> {
    pub fn new(state: &'a ClientState) -> Self {
        Self { state }
    }

    /// Takes the device's free analysis for the attempt about to run;
    /// `false` when it is already taken. Members always pass.
    pub async fn try_claim(&self, authenticated: bool) -> Result<bool, StoreError> {
        if authenticated {
            return Ok(true);
        }
        self.state
            .update_json(GUEST_USED_KEY, |used: bool| {
                if used {
                    (None, false)
                } else {
                    (Some(true), true)
                }
            })
            .await
    }

    /// Hands the free analysis back after an attempt that stored nothing.
    pub async fn release(&self, authenticated: bool) -> Result<(), StoreError> {
        if authenticated {
            return Ok(());
        }
        self.state.clear(GUEST_USED_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::YieldingStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn guests_get_exactly_one() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), "dev");
        let gate = GuestGate::new(&state);

        assert!(gate.try_claim(false).await.unwrap());
        assert!(!gate.try_claim(false).await.unwrap());
        assert!(gate.try_claim(true).await.unwrap());
    }

    #[tokio::test]
    async fn released_claims_can_be_taken_again() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), "dev");
        let gate = GuestGate::new(&state);

        assert!(gate.try_claim(false).await.unwrap());
        gate.release(false).await.unwrap();
        assert!(gate.try_claim(false).await.unwrap());
    }

    #[tokio::test]
    async fn members_never_touch_the_flag() {
        let state = ClientState::new(Arc::new(MemoryStore::new()), "dev");
        let gate = GuestGate::new(&state);
        assert!(gate.try_claim(true).await.unwrap());
        assert_eq!(state.get_json::<bool>(GUEST_USED_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn parallel_guest_attempts_get_one_claim() {
        let state = ClientState::new(Arc::new(YieldingStore::new()), "dev");
        let gate = GuestGate::new(&state);

        let claims = futures::future::join_all((0..4).map(|_| gate.try_claim(false))).await;
        let granted = claims.into_iter().filter(|c| *c.as_ref().unwrap()).count();
        assert_eq!(granted, 1);
    }
}
