//! Midnight Proxy: a local MITM proxy that decrypts traffic of one target domain and lets
//! an external script rewrite the JSON bodies of matching requests and responses.

pub mod config;
pub mod directive;
pub mod engine;
pub mod invoker;
pub mod pattern;
pub mod platform;
pub mod proxy;
pub mod trust_anchor;
pub mod utils;

pub use directive::{Directive, Phase};
pub use engine::{EngineContext, Exchange, InterceptHandler, InterceptionEngine};
pub use invoker::{BodyJson, TransformInvoker, TransformPayload};
pub use pattern::TargetRule;
pub use proxy::{ProxyHandle, ProxyService};
pub use trust_anchor::CaMaterial;
pub use utils::MidnightError;
