//! Mock implementations for testing

use async_trait::async_trait;
use dirhost_cache::AppInstance;
use mockall::mock;

mock! {
    pub AppInstance {}

    #[async_trait]
    impl AppInstance for AppInstance {
        fn can_stop(&self) -> bool;
        async fn stop(&self) -> anyhow::Result<()>;
    }
}

impl MockAppInstance {
    /// Mock with a teardown hook that succeeds exactly once
    pub fn stoppable() -> Self {
        let mut mock = Self::new();
        mock.expect_can_stop().return_const(true);
        mock.expect_stop().times(1).returning(|| Ok(()));
        mock
    }

    /// Mock without a teardown hook; `stop` must never be called
    pub fn without_stop() -> Self {
        let mut mock = Self::new();
        mock.expect_can_stop().return_const(false);
        mock.expect_stop().never();
        mock
    }
}
