use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bridge_api::{BridgeError, Precision, StorageBackend};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Имя базы для `CREATE DATABASE`: TDengine не квотирует идентификаторы
/// в этом выражении, поэтому допускаем только безопасные символы.
fn validate_db_name(name: &str) -> Result<(), BridgeError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(BridgeError::request(format!("invalid database name '{name}'")))
    }
}

/// Ответ `/rest/sql`: `code == 0` при успехе, иначе `desc` с описанием.
#[derive(serde::Deserialize)]
struct RestResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
}

/// Статусы, после которых backend считается недоступным.
fn is_unavailable(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 502 | 503 | 504)
}

/// Запрос не дошёл до ответа: отказ в соединении, таймаут или обрыв
/// соединения посреди отправки.
fn is_connection_failure(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

fn transport_error(context: &str, e: reqwest::Error) -> BridgeError {
    if is_connection_failure(&e) {
        BridgeError::connection(format!("{context}: {e}"))
    } else {
        BridgeError::request(format!("{context}: {e}"))
    }
}

fn status_error(context: &str, status: reqwest::StatusCode, body: &str) -> BridgeError {
    let msg = format!("{context}: HTTP {status}: {}", body.trim());
    if is_unavailable(status) {
        BridgeError::connection(msg)
    } else {
        BridgeError::request(msg)
    }
}

/// TDengine backend поверх HTTP API taosAdapter.
///
/// DDL идёт через `/rest/sql`, строки line protocol через
/// `/influxdb/v1/write`. REST не держит сессию, поэтому `use_database`
/// только запоминает базу для последующих вставок.
pub struct TdengineBackend {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    active_database: String,
}

impl TdengineBackend {
    pub fn new(cfg: &TdengineConfig) -> Result<Self, BridgeError> {
        let scheme = if cfg.tls { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{scheme}://{}:{}", cfg.host, cfg.port),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            active_database: cfg.database.clone(),
        })
    }

    pub fn active_database(&self) -> &str {
        &self.active_database
    }

    async fn exec(&self, sql: &str) -> Result<(), BridgeError> {
        let resp = self
            .http
            .post(format!("{}/rest/sql", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| transport_error("TDengine request", e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error("TDengine read", e))?;

        check_rest_response(status, &body)
    }

    async fn write(&self, lines: &[String], precision: Precision) -> Result<(), BridgeError> {
        let resp = self
            .http
            .post(format!("{}/influxdb/v1/write", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .query(&[
                ("db", self.active_database.as_str()),
                ("precision", precision.as_str()),
            ])
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|e| transport_error("TDengine write", e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error("TDengine write", status, &body))
    }
}

fn check_rest_response(status: reqwest::StatusCode, body: &str) -> Result<(), BridgeError> {
    if is_unavailable(status) {
        return Err(status_error("TDengine", status, body));
    }

    match serde_json::from_str::<RestResponse>(body) {
        Ok(RestResponse { code: 0, .. }) if status.is_success() => Ok(()),
        Ok(RestResponse { code, desc }) => Err(BridgeError::request(format!(
            "TDengine error {code:#x}: {}",
            desc.unwrap_or_else(|| body.trim().to_string())
        ))),
        Err(_) if !status.is_success() => Err(status_error("TDengine", status, body)),
        Err(e) => Err(BridgeError::format_err(format!("parse TDengine response: {e}"))),
    }
}

impl StorageBackend for TdengineBackend {
    fn create_database(&mut self, name: &str) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_db_name(&name)?;
            self.exec(&format!("CREATE DATABASE IF NOT EXISTS {name}")).await?;
            tracing::info!(database = %name, "database ready");
            Ok(())
        })
    }

    fn use_database(&mut self, name: &str) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_db_name(&name)?;
            self.active_database = name;
            Ok(())
        })
    }

    fn insert_lines(
        &mut self,
        lines: &[String],
        precision: Precision,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        let lines = lines.to_vec();
        Box::pin(async move {
            if lines.is_empty() {
                return Ok(());
            }
            self.write(&lines, precision).await
        })
    }
}

// ---- Config ----

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TdengineConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Начальное значение активной базы. Write pipeline вызывает
    /// `use_database` перед каждой вставкой, так что строки всегда уходят
    /// в базу из topic'а; это поле видно только через `active_database`
    /// до первой записи. Оставлено ради совместимости с `TDENGINE_DBNAME`.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

pub fn default_port() -> u16 {
    6041
}
pub fn default_user() -> String {
    "root".into()
}
pub fn default_password() -> String {
    "taosdata".into()
}
pub fn default_database() -> String {
    "telemetry".into()
}
