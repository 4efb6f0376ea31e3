use shellexpand::tilde;
use crate::utils::MidnightError;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_yaml as yml;
use std::{fs, path::{Path, PathBuf}};
use serde::{Serialize, Deserialize};
use log::{LevelFilter, debug};
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config as LogConfig, Logger, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter
};

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}";

/// Interpreter used to run the transformer script: `program args... <script> <method> <url> <phase> <body>`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfig {
    pub program: String,
    pub args: Vec<String>
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            program: "deno".to_string(),
            args: vec!["eval".to_string()]
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub workplace: String,
    pub address: String,
    pub port: u16,
    pub target_domain: Option<String>,
    pub plugin_path: Option<String>,
    pub runtime: RuntimeConfig,
    pub transform_timeout_secs: u64,
    pub ca_cert: Option<String>,
    pub ca_key: Option<String>,
    pub leaf_cache_size: u64,
    pub system_proxy: bool,
    pub bypass_list: String,
    pub debug_file: Option<String>,
    pub verbose: bool
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workplace: tilde("~/.midnight/").to_string(),
            address: "127.0.0.1".to_string(),
            port: 8888_u16,
            target_domain: None,
            plugin_path: None,
            runtime: RuntimeConfig::default(),
            transform_timeout_secs: 10,
            ca_cert: None,
            ca_key: None,
            leaf_cache_size: 1_000,
            system_proxy: true,
            bypass_list: "localhost;127.0.0.1".to_string(),
            debug_file: None,
            verbose: false
        }
    }
}

impl Config {
    pub fn proxy_address(&self) -> String {
        format!("http://{}:{}", &self.address, self.port)
    }
}

pub enum Launch {
    Proxy(Config),
    GenerateCa(PathBuf)
}

// -----------------------------------------------------------------------------------------------//

pub fn cli() -> Command {
    Command::new("midnight-proxy")
        .about("Intercepts TLS traffic of one domain and lets a script rewrite its JSON bodies")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("domain-pattern")
                .short('d')
                .long("domain-pattern")
                .value_name("DOMAIN")
                .help("Domain to intercept, e.g. example.com; all of its subdomains are matched (required)")
        )
        .arg(
            Arg::new("plugin-path")
                .short('s')
                .long("plugin-path")
                .value_name("SCRIPT")
                .help("Path to the transformer script, re-read on every invocation (required)")
        )
        .arg(
            Arg::new("workplace")
                .short('P')
                .long("workplace")
                .value_name("WORKPLACE_DIR")
                .default_value("~/.midnight/")
                .help("Directory for config, exported CA certificate and lock file")
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("YAML_CONFIG")
                .help("Path to config with YAML format, default: <WORKPLACE_DIR>/config.yaml")
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("Address for proxy to bind, default: 127.0.0.1")
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port for proxy to listen to, default: 8888")
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECONDS")
                .help("Transformer time limit per message, default: 10")
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .value_name("PROGRAM")
                .help("Script interpreter, default: deno")
        )
        .arg(
            Arg::new("no-system-proxy")
                .long("no-system-proxy")
                .action(ArgAction::SetTrue)
                .help("Do not touch OS-wide proxy settings")
        )
        .arg(
            Arg::new("debug-file")
                .long("debug-file")
                .value_name("FILE-TO-WRITE")
                .help("A file to write debug messages to")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Print debug messages to the console")
        )
        .subcommand(
            Command::new("generate-ca")
                .about("Generate a new CA certificate and key to use instead of the embedded one")
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("DIR")
                        .default_value(".")
                        .help("Directory to write ca_cert.pem and ca_key.pem to")
                )
        )
}

pub fn handle_user_input() -> Result<Launch, MidnightError> {
    let matches = cli().get_matches();
    from_matches(&matches)
}

pub fn from_matches(matches: &ArgMatches) -> Result<Launch, MidnightError> {
    if let Some(("generate-ca", args)) = matches.subcommand() {
        let out = args
            .get_one::<String>("out")
            .ok_or(MidnightError::ConfigError("'--out' arg not found".to_owned()))?;
        return Ok(Launch::GenerateCa(PathBuf::from(tilde(out).to_string())));
    }

    let workplace = tilde(
        matches
            .get_one::<String>("workplace")
            .ok_or(MidnightError::ConfigError("'--workplace' arg not found".to_owned()))?
    ).to_string();

    let workplace_path = Path::new(&workplace);
    if !workplace_path.exists() {
        fs::create_dir_all(workplace_path)?;
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(config_name) => {
            let config_name = tilde(config_name).to_string();
            let file = fs::File::open(&config_name)
                .map_err(|e| MidnightError::ConfigError(format!("Cannot open '{}': {}", &config_name, e)))?;
            let config_from_file: Config = yml::from_reader(file)?;
            config_from_file
        },
        None => {
            let config_name = workplace_path.join("config.yaml");
            if config_name.exists() {
                let file = fs::File::open(&config_name)?;
                let config_from_file: Config = yml::from_reader(file)?;
                config_from_file
            }
            else {
                let default_config = Config {
                    workplace: workplace.clone(),
                    ..Default::default()
                };
                let file = fs::File::create(&config_name)?;
                yml::to_writer(file, &default_config)?;
                default_config
            }
        }
    };

    config.workplace = workplace;

    if let Some(domain) = matches.get_one::<String>("domain-pattern") {
        config.target_domain = Some(domain.to_string());
    }

    if let Some(plugin) = matches.get_one::<String>("plugin-path") {
        config.plugin_path = Some(plugin.to_string());
    }

    if let Some(addr) = matches.get_one::<String>("address") {
        config.address = addr.to_string();
    }

    if let Some(port) = matches.get_one::<String>("port") {
        config.port = port
            .parse()
            .map_err(|_| MidnightError::ConfigError(format!("'{}' is not a valid port", port)))?;
    }

    if let Some(timeout) = matches.get_one::<String>("timeout") {
        config.transform_timeout_secs = timeout
            .parse()
            .map_err(|_| MidnightError::ConfigError(format!("'{}' is not a number of seconds", timeout)))?;
    }

    if let Some(runtime) = matches.get_one::<String>("runtime") {
        config.runtime.program = runtime.to_string();
    }

    if matches.get_flag("no-system-proxy") {
        config.system_proxy = false;
    }

    if let Some(dfile) = matches.get_one::<String>("debug-file") {
        config.debug_file = Some(tilde(dfile).to_string());
    }

    if matches.get_flag("verbose") {
        config.verbose = true;
    }

    let domain_missing = config.target_domain.as_ref().map_or(true, |d| d.trim().is_empty());
    let plugin_missing = config.plugin_path.as_ref().map_or(true, |p| p.trim().is_empty());
    if domain_missing || plugin_missing {
        return Err(
            MidnightError::ConfigError("Both --plugin-path and --domain-pattern are required".to_string())
        );
    }

    if let Some(plugin) = config.plugin_path.as_ref() {
        config.plugin_path = Some(absolute_path(&tilde(plugin))?.to_string_lossy().to_string());
    }

    Ok(Launch::Proxy(config))
}

fn absolute_path(path: &str) -> Result<PathBuf, MidnightError> {
    let path = Path::new(path);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    Ok(std::env::current_dir()?.join(path))
}

pub fn init_logging(config: &Config) -> Result<(), MidnightError> {
    let console_level = if config.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder = LogConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(console_level)))
                .build("stdout", Box::new(stdout))
        )
        .logger(Logger::builder().build("hyper", LevelFilter::Info))
        .logger(Logger::builder().build("rustls", LevelFilter::Info))
        .logger(Logger::builder().build("hudsucker", LevelFilter::Info));
    let mut root = Root::builder().appender("stdout");

    if let Some(dfile) = config.debug_file.as_ref() {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(dfile)?;
        builder = builder.appender(Appender::builder().build("debug_file", Box::new(file)));
        root = root.appender("debug_file");
    }

    let log_config = builder
        .build(root.build(LevelFilter::Debug))
        .map_err(|e| MidnightError::ConfigError(e.to_string()))?;
    log4rs::init_config(log_config)
        .map_err(|e| MidnightError::ConfigError(e.to_string()))?;

    debug!("Logging initialized");
    Ok(())
}

// -----------------------------------------------------------------------------------------------//
