#![forbid(unsafe_code)]

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{ApiError, ApiResult};

/// Cooperative cancellation handle passed into every collaborator call.
///
/// The generation identifies which request the token belongs to; effects are applied
/// only while the token is the current one in its [`TokenSlot`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: CancellationToken,
    generation: u64,
}

impl CancelToken {
    pub fn new(generation: u64) -> Self {
        Self { inner: CancellationToken::new(), generation }
    }

    /// A token nobody will cancel (one-off calls such as aggregates).
    pub fn detached() -> Self {
        Self::new(0)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

/// Holder of the single live token for one request stream.
///
/// `supersede` is the only way to invalidate a prior operation.
#[derive(Debug, Default)]
pub struct TokenSlot {
    current: Option<CancelToken>,
    generation: u64,
}

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the live token (if any) and issue the next one.
    pub fn supersede(&mut self) -> CancelToken {
        self.cancel();
        self.generation += 1;
        let token = CancelToken::new(self.generation);
        self.current = Some(token.clone());
        token
    }

    pub fn cancel(&mut self) {
        if let Some(t) = self.current.take() {
            t.cancel();
        }
    }

    /// Drop the live token without cancelling it once its request settled.
    pub fn release(&mut self, generation: u64) {
        if matches!(&self.current, Some(t) if t.generation == generation) {
            self.current = None;
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` still owns the slot.
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(&self.current, Some(t) if t.generation == generation && !t.is_cancelled())
    }

    pub fn in_flight(&self) -> bool {
        self.current.as_ref().map_or(false, |t| !t.is_cancelled())
    }
}

/// Race `fut` against `token`; cancellation wins ties.
pub async fn guard<F, T>(token: &CancelToken, fut: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    if token.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ApiError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn supersede_cancels_previous() {
        let mut slot = TokenSlot::new();
        let a = slot.supersede();
        let b = slot.supersede();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!slot.is_current(a.generation()));
        assert!(slot.is_current(b.generation()));
        slot.cancel();
        assert!(b.is_cancelled());
        assert!(!slot.in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn guard_returns_cancelled() {
        let token = CancelToken::new(1);
        let t2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            t2.cancel();
        });
        let res: ApiResult<u8> = guard(&token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert_eq!(res, Err(ApiError::Cancelled));
    }
}
