//! Reusable applications and site layouts

use async_trait::async_trait;
use dirhost_cache::{AppInstance, RegistryRuntime};
use dirhost_config::CacheConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Application without a teardown hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticApp {
    pub name: String,
}

impl StaticApp {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

#[async_trait]
impl AppInstance for StaticApp {}

/// Application whose teardown never finishes on its own
#[derive(Debug, Default)]
pub struct HangingApp {
    pub stop_calls: AtomicUsize,
}

impl HangingApp {
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppInstance for HangingApp {
    fn can_stop(&self) -> bool {
        true
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Cache configuration rooted at `root` with development mode on
pub fn test_config(root: impl Into<PathBuf>) -> CacheConfig {
    CacheConfig {
        document_root: root.into(),
        dev_mode: true,
        stop_timeout_ms: 200,
        ..CacheConfig::default()
    }
}

/// Registry describing a small site under `/site`
///
/// - `/site/blog/index.js` requires `./render.js` and `../lib/util.js`
/// - `/site/shop/index.js` requires `../lib/util.js`
/// - `/site/about/index.js` requires nothing
pub fn blog_site() -> Arc<RegistryRuntime> {
    let runtime = Arc::new(RegistryRuntime::new());
    runtime.register_app(
        "/site/blog/index.js",
        &["./render.js", "../lib/util.js"],
        || StaticApp::new("blog"),
    );
    runtime.register_module("/site/blog/render.js", &[]);
    runtime.register_module("/site/lib/util.js", &[]);
    runtime.register_app("/site/shop/index.js", &["../lib/util.js"], || {
        StaticApp::new("shop")
    });
    runtime.register_app("/site/about/index.js", &[], || StaticApp::new("about"));
    runtime
}
