use midnight_proxy::{
    config::{self, Config, Launch},
    platform::{
        CommandScriptRuntime,
        ExportingTrustBootstrap,
        LockFileGuard,
        ManualSystemProxy,
        ScriptRuntime,
        SingleInstanceGuard,
        SystemProxyGuard,
        TrustBootstrap
    },
    trust_anchor,
    CaMaterial,
    EngineContext,
    InterceptionEngine,
    MidnightError,
    ProxyService,
    TargetRule,
    TransformInvoker
};
use log::{error, info, warn};
use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    process::exit
};

const INSTANCE_NAME: &str = "midnight-proxy";

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", err);
        std::future::pending::<()>().await;
    }
}

fn usage_and_exit(err: MidnightError) -> ! {
    eprintln!("{}\n", err);
    eprintln!("{}", config::cli().render_help());
    exit(2);
}

fn load_ca(config: &Config) -> Result<CaMaterial, MidnightError> {
    match (config.ca_cert.as_ref(), config.ca_key.as_ref()) {
        (Some(cert), Some(key)) => CaMaterial::from_files(cert, key),
        (None, None) => CaMaterial::load(),
        _ => Err(MidnightError::ConfigError("Both ca_cert and ca_key must be set to use a custom CA".to_string()))
    }
}

async fn run(config: Config) -> Result<(), MidnightError> {
    let mut instance = LockFileGuard::new(Path::new(&config.workplace));
    if !instance.try_acquire(INSTANCE_NAME) {
        info!("Another instance is already running");
        return Ok(());
    }

    let ca = load_ca(&config)?;

    let domain = config.target_domain.clone().unwrap_or_default();
    let rule = match TargetRule::compile(&domain) {
        Ok(rule) => rule,
        Err(err) => {
            instance.release();
            usage_and_exit(err);
        }
    };

    if let Err(err) = CommandScriptRuntime::new(&config.runtime.program).ensure_available() {
        warn!("{}; messages will be forwarded unmodified", err);
    }

    if let Err(err) = ExportingTrustBootstrap::new(Path::new(&config.workplace)).ensure_ca_trusted(ca.cert_pem()) {
        warn!("Could not export CA certificate: {}", err);
    }

    let addr = SocketAddr::from((config.address.parse::<IpAddr>()?, config.port));
    let engine = InterceptionEngine::new(
        EngineContext {
            rule,
            invoker: TransformInvoker::from_config(&config)?
        }
    );
    info!(
        "Intercepting *.{}.* with '{}'",
        engine.rule().label(),
        config.plugin_path.as_deref().unwrap_or_default()
    );

    let mut handle = ProxyService::new(addr, ca, config.leaf_cache_size, engine).start()?;

    let system_proxy = ManualSystemProxy;
    let _proxy_guard = if config.system_proxy {
        Some(SystemProxyGuard::enable(&system_proxy, &config.proxy_address(), &config.bypass_list))
    }
    else {
        None
    };

    let finished = tokio::select! {
        result = handle.wait() => Some(result),
        _ = shutdown_signal() => None
    };

    match finished {
        Some(result) => result,
        None => handle.stop().await
    }
}

#[tokio::main]
async fn main() {
    let launch = match config::handle_user_input() {
        Ok(launch) => launch,
        Err(err) => usage_and_exit(err)
    };

    let config = match launch {
        Launch::GenerateCa(dir) => {
            match trust_anchor::write_generated(&dir) {
                Ok((cert, key)) => {
                    println!("CA written to '{}' and '{}'", cert.display(), key.display());
                    println!("Set ca_cert and ca_key in config.yaml to use it");
                    return;
                },
                Err(err) => {
                    eprintln!("{}", err);
                    exit(1);
                }
            }
        },
        Launch::Proxy(config) => config
    };

    if let Err(err) = config::init_logging(&config) {
        eprintln!("Cannot configure logging: {}", err);
        exit(1);
    }

    if let Err(err) = run(config).await {
        error!("{}", err);
        exit(1);
    }
}
