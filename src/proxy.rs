use std::net::SocketAddr;
use hudsucker::ProxyBuilder;
use log::info;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    engine::{InterceptHandler, InterceptionEngine},
    trust_anchor::CaMaterial,
    utils::MidnightError
};

pub struct ProxyService {
    addr: SocketAddr,
    ca: CaMaterial,
    leaf_cache_size: u64,
    engine: InterceptionEngine
}

/// Running proxy. Dropping the handle closes the shutdown channel, which stops the proxy
/// just like `stop` without waiting for it.
pub struct ProxyHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), MidnightError>>
}

impl ProxyService {
    pub fn new(addr: SocketAddr, ca: CaMaterial, leaf_cache_size: u64, engine: InterceptionEngine) -> Self {
        ProxyService {
            addr,
            ca,
            leaf_cache_size,
            engine
        }
    }

    pub fn start(self) -> Result<ProxyHandle, MidnightError> {
        let authority = self.ca.authority(self.leaf_cache_size)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let proxy = ProxyBuilder::new()
            .with_addr(self.addr)
            .with_rustls_client()
            .with_ca(authority)
            .with_http_handler(InterceptHandler::new(self.engine))
            .build();

        info!("Listening on {}", self.addr);
        let task = tokio::spawn(async move {
            proxy
                .start(async {
                    let _ = shutdown_rx.await;
                })
                .await?;
            Ok::<(), MidnightError>(())
        });

        Ok(
            ProxyHandle {
                addr: self.addr,
                shutdown: Some(shutdown_tx),
                task
            }
        )
    }
}

impl ProxyHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Resolves when the proxy stops on its own, which only happens on failure (e.g. the
    /// port is taken) or after `stop`.
    pub async fn wait(&mut self) -> Result<(), MidnightError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(err) => Err(MidnightError::UndefinedError(format!("Proxy task failed: {}", err)))
        }
    }

    pub async fn stop(mut self) -> Result<(), MidnightError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        info!("Proxy on {} stopping", self.addr);
        self.wait().await
    }
}
