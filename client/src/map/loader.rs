use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{self, Either, FutureExt, LocalBoxFuture, Shared};
use serde::Deserialize;
use tracing::{debug, warn};
use tradhelm_shared::FeatureCollection;

use crate::map::error::LoadError;

/// Raw HTTP answer; validation is the loader's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait FeatureFetcher {
    /// Performs one `GET`. Transport failures map to [`LoadError::Network`].
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, LoadError>>;
}

/// Browser `fetch` through gloo-net.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl FeatureFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, LoadError>> {
        let url = url.to_owned();
        async move {
            let network = |e: gloo_net::Error| LoadError::Network {
                url: url.clone(),
                message: e.to_string(),
            };
            let resp = gloo_net::http::Request::get(&url)
                .send()
                .await
                .map_err(network)?;
            let status = resp.status();
            let body = resp.text().await.map_err(network)?;
            Ok(FetchResponse { status, body })
        }
        .boxed_local()
    }
}

type LoadResult = Result<Rc<FeatureCollection>, LoadError>;
type InflightLoad = Shared<LocalBoxFuture<'static, LoadResult>>;

struct LoaderInner {
    fetcher: Box<dyn FeatureFetcher>,
    cache: RefCell<HashMap<String, Rc<FeatureCollection>>>,
    inflight: RefCell<HashMap<String, InflightLoad>>,
}

/// Session-wide `FeatureCollection` cache keyed by URL.
///
/// Concurrent loads of one key share a single request. Failures are not cached.
/// There is no eviction: the set of datasets per session is small and fixed.
#[derive(Clone)]
pub struct FeatureLoader {
    inner: Rc<LoaderInner>,
}

impl FeatureLoader {
    pub fn new(fetcher: impl FeatureFetcher + 'static) -> Self {
        Self {
            inner: Rc::new(LoaderInner {
                fetcher: Box::new(fetcher),
                cache: RefCell::new(HashMap::new()),
                inflight: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn cached(&self, key: &str) -> Option<Rc<FeatureCollection>> {
        self.inner.cache.borrow().get(key).cloned()
    }

    #[cfg(test)]
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.cache.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub fn is_inflight(&self, key: &str) -> bool {
        self.inner.inflight.borrow().contains_key(key)
    }

    /// The cache lookup, in-flight lookup and in-flight insert happen synchronously
    /// before the returned future is first polled.
    pub fn load(&self, key: &str) -> impl Future<Output = LoadResult> + 'static {
        if let Some(hit) = self.cached(key) {
            return Either::Left(future::ready(Ok(hit)));
        }

        if let Some(pending) = self.inner.inflight.borrow().get(key) {
            debug!(url = key, "joining in-flight load");
            return Either::Right(pending.clone());
        }

        debug!(url = key, "loading feature collection");
        let request = self.inner.fetcher.fetch(key);
        let url = key.to_owned();
        let weak = Rc::downgrade(&self.inner);
        let shared = async move {
            let result = request.await.and_then(|resp| validate(&url, resp));
            settle(&weak, &url, &result);
            result
        }
        .boxed_local()
        .shared();

        self.inner
            .inflight
            .borrow_mut()
            .insert(key.to_owned(), shared.clone());
        Either::Right(shared)
    }
}

fn settle(inner: &Weak<LoaderInner>, url: &str, result: &LoadResult) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.inflight.borrow_mut().remove(url);
    match result {
        Ok(collection) => {
            inner
                .cache
                .borrow_mut()
                .insert(url.to_owned(), Rc::clone(collection));
            debug!(url, features = collection.len(), "feature collection cached");
        }
        Err(e) => warn!(url, error = %e, "feature collection load failed"),
    }
}

#[derive(Deserialize)]
struct KindTag {
    #[serde(rename = "type")]
    kind: Option<serde_json::Value>,
}

fn validate(url: &str, resp: FetchResponse) -> LoadResult {
    if !resp.ok() {
        return Err(LoadError::Status {
            url: url.to_owned(),
            status: resp.status,
        });
    }

    let parse = |e: serde_json::Error| LoadError::Parse {
        url: url.to_owned(),
        message: e.to_string(),
    };

    let tag: KindTag = serde_json::from_str(&resp.body).map_err(parse)?;
    match tag.kind {
        Some(serde_json::Value::String(kind)) if kind == "FeatureCollection" => {}
        other => {
            let kind = match other {
                Some(serde_json::Value::String(kind)) => kind,
                Some(value) => value.to_string(),
                None => "missing".to_owned(),
            };
            return Err(LoadError::NotFeatureCollection {
                url: url.to_owned(),
                kind,
            });
        }
    }

    serde_json::from_str::<FeatureCollection>(&resp.body)
        .map(Rc::new)
        .map_err(parse)
}
