use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use bridge_api::QoS;
use pipeline::PipelineConfig;
use storage_tdengine::TdengineConfig;
use transport_mqtt::MqttConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "bridge-server", about = "MQTT → TDengine telemetry bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить bridge
    Serve(ServeArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args (каждый ключ можно задать через env)
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Порт HTTP status API
    #[arg(long, env = "SERVER_PORT")]
    pub api_port: Option<u16>,

    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,
    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,
    #[arg(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,
    #[arg(long, env = "MQTT_PASS", hide_env_values = true)]
    pub mqtt_password: Option<String>,
    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub mqtt_client_id: Option<String>,
    /// Topic filter подписки
    #[arg(long, env = "MQTT_SUB_TOPIC")]
    pub mqtt_topic: Option<String>,
    /// QoS подписки: 0, 1 или 2
    #[arg(long, env = "MQTT_SUB_QOS", value_parser = parse_qos)]
    pub mqtt_qos: Option<QoS>,

    #[arg(long, env = "TDENGINE_HOST")]
    pub tdengine_host: Option<String>,
    #[arg(long, env = "TDENGINE_PORT")]
    pub tdengine_port: Option<u16>,
    #[arg(long, env = "TDENGINE_USER")]
    pub tdengine_user: Option<String>,
    #[arg(long, env = "TDENGINE_PASS", hide_env_values = true)]
    pub tdengine_password: Option<String>,
    /// Начальная активная база backend'а. Записи всегда идут в базу из
    /// topic'а, на запись значение не влияет.
    #[arg(long, env = "TDENGINE_DBNAME")]
    pub tdengine_database: Option<String>,
}

fn parse_qos(s: &str) -> Result<QoS, String> {
    let level: u8 = s.parse().map_err(|e| format!("{e}"))?;
    QoS::try_from(level)
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub api_port: Option<u16>,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub tdengine: TdengineSection,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct MqttSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub qos: Option<QoS>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TdengineSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub tls: Option<bool>,
    pub accept_invalid_certs: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: defaults < config.toml < env/CLI.
#[derive(Debug)]
pub struct Effective {
    pub api_port: u16,
    pub mqtt: MqttConfig,
    pub tdengine: TdengineConfig,
    pub pipeline: PipelineConfig,
}

impl Effective {
    /// Отсутствующий конфиг файл допустим, если его нет на диске.
    pub fn new(args: &ServeArgs) -> Result<Self, ServerError> {
        let cfg = match FileConfig::load(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                tracing::info!(config = %args.config, "config file not found, using env/CLI only");
                FileConfig::default()
            }
        };
        Self::merge(args, cfg)
    }

    pub fn merge(args: &ServeArgs, cfg: FileConfig) -> Result<Self, ServerError> {
        let FileConfig { api_port, mqtt, tdengine, pipeline } = cfg;

        let mqtt_host = args.mqtt_host.clone().or(mqtt.host);
        let mqtt_topic = args.mqtt_topic.clone().or(mqtt.topic);
        let tdengine_host = args.tdengine_host.clone().or(tdengine.host);

        let mut missing = Vec::new();
        if mqtt_host.is_none() {
            missing.push("mqtt.host (MQTT_HOST)");
        }
        if mqtt_topic.is_none() {
            missing.push("mqtt.topic (MQTT_SUB_TOPIC)");
        }
        if tdengine_host.is_none() {
            missing.push("tdengine.host (TDENGINE_HOST)");
        }
        let (Some(mqtt_host), Some(mqtt_topic), Some(tdengine_host)) = (mqtt_host, mqtt_topic, tdengine_host)
        else {
            return Err(ServerError::MissingSettings(missing));
        };

        pipeline
            .validate()
            .map_err(|detail| ServerError::Config { context: "validate", detail })?;

        Ok(Self {
            api_port: args.api_port.or(api_port).unwrap_or_else(default_api_port),
            mqtt: MqttConfig {
                host: mqtt_host,
                port: args.mqtt_port.or(mqtt.port).unwrap_or_else(transport_mqtt::default_port),
                user: args.mqtt_user.clone().or(mqtt.user),
                password: args.mqtt_password.clone().or(mqtt.password),
                client_id: args
                    .mqtt_client_id
                    .clone()
                    .or(mqtt.client_id)
                    .unwrap_or_else(transport_mqtt::default_client_id),
                topic: mqtt_topic,
                qos: args.mqtt_qos.or(mqtt.qos).unwrap_or_else(transport_mqtt::default_qos),
            },
            tdengine: TdengineConfig {
                host: tdengine_host,
                port: args.tdengine_port.or(tdengine.port).unwrap_or_else(storage_tdengine::default_port),
                user: args
                    .tdengine_user
                    .clone()
                    .or(tdengine.user)
                    .unwrap_or_else(storage_tdengine::default_user),
                password: args
                    .tdengine_password
                    .clone()
                    .or(tdengine.password)
                    .unwrap_or_else(storage_tdengine::default_password),
                database: args
                    .tdengine_database
                    .clone()
                    .or(tdengine.database)
                    .unwrap_or_else(storage_tdengine::default_database),
                tls: tdengine.tls.unwrap_or(false),
                accept_invalid_certs: tdengine.accept_invalid_certs.unwrap_or(false),
            },
            pipeline,
        })
    }
}

fn default_api_port() -> u16 {
    8000
}
