//! NETCONF RPC construction.
//!
//! Builders assemble the operation body; the transport wraps it in the
//! `<rpc>` envelope and assigns the message id at send time. Text parameters
//! are escaped; configuration and filter bodies pass through verbatim.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;

pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
pub const MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";
pub const WITH_DEFAULTS_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults";

/// A datastore usable as an RPC source or target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Store {
    Running,
    Startup,
    Candidate,
    Url(String),
}

impl Store {
    fn to_xml(&self) -> String {
        match self {
            Store::Running => "<running/>".to_string(),
            Store::Startup => "<startup/>".to_string(),
            Store::Candidate => "<candidate/>".to_string(),
            Store::Url(url) => format!("<url>{}</url>", escape(url.as_str())),
        }
    }
}

/// Source side of copy-config: a datastore or inline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    Store(Store),
    Config(String),
}

/// RFC 6243 with-defaults handling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithDefaults {
    ReportAll,
    ReportAllTagged,
    Trim,
    Explicit,
}

impl WithDefaults {
    fn as_str(self) -> &'static str {
        match self {
            WithDefaults::ReportAll => "report-all",
            WithDefaults::ReportAllTagged => "report-all-tagged",
            WithDefaults::Trim => "trim",
            WithDefaults::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOperation {
    Merge,
    Replace,
    None,
}

impl DefaultOperation {
    fn as_str(self) -> &'static str {
        match self {
            DefaultOperation::Merge => "merge",
            DefaultOperation::Replace => "replace",
            DefaultOperation::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOption {
    ContinueOnError,
    StopOnError,
    RollbackOnError,
}

impl ErrorOption {
    fn as_str(self) -> &'static str {
        match self {
            ErrorOption::ContinueOnError => "continue-on-error",
            ErrorOption::StopOnError => "stop-on-error",
            ErrorOption::RollbackOnError => "rollback-on-error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOption {
    TestThenSet,
    Set,
    TestOnly,
}

impl TestOption {
    fn as_str(self) -> &'static str {
        match self {
            TestOption::TestThenSet => "test-then-set",
            TestOption::Set => "set",
            TestOption::TestOnly => "test-only",
        }
    }
}

/// One RPC body ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    body: String,
}

impl Rpc {
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Wrap the body in the `<rpc>` envelope with the given message id.
    pub fn into_envelope(self, message_id: u64) -> String {
        format!(
            r#"<rpc xmlns="{BASE_NS}" message-id="{message_id}">{}</rpc>"#,
            self.body
        )
    }
}

fn filter_xml(filter: Option<&str>) -> String {
    match filter {
        Some(filter) => format!(r#"<filter type="subtree">{filter}</filter>"#),
        None => String::new(),
    }
}

fn with_defaults_xml(mode: Option<WithDefaults>) -> String {
    match mode {
        Some(mode) => format!(
            r#"<with-defaults xmlns="{WITH_DEFAULTS_NS}">{}</with-defaults>"#,
            mode.as_str()
        ),
        None => String::new(),
    }
}

pub fn get(filter: Option<&str>, with_defaults: Option<WithDefaults>) -> Rpc {
    Rpc {
        body: format!("<get>{}{}</get>", filter_xml(filter), with_defaults_xml(with_defaults)),
    }
}

pub fn get_config(source: &Store, filter: Option<&str>, with_defaults: Option<WithDefaults>) -> Rpc {
    Rpc {
        body: format!(
            "<get-config><source>{}</source>{}{}</get-config>",
            source.to_xml(),
            filter_xml(filter),
            with_defaults_xml(with_defaults)
        ),
    }
}

pub fn edit_config(
    target: &Store,
    config: &str,
    default_operation: Option<DefaultOperation>,
    error_option: Option<ErrorOption>,
    test_option: Option<TestOption>,
) -> Rpc {
    let mut body = String::from("<edit-config>");
    body.push_str(&format!("<target>{}</target>", target.to_xml()));
    if let Some(operation) = default_operation {
        body.push_str(&format!(
            "<default-operation>{}</default-operation>",
            operation.as_str()
        ));
    }
    if let Some(option) = test_option {
        body.push_str(&format!("<test-option>{}</test-option>", option.as_str()));
    }
    if let Some(option) = error_option {
        body.push_str(&format!("<error-option>{}</error-option>", option.as_str()));
    }
    body.push_str(&format!("<config>{config}</config>"));
    body.push_str("</edit-config>");
    Rpc { body }
}

pub fn copy_config(target: &Store, source: &CopySource) -> Rpc {
    let source = match source {
        CopySource::Store(store) => store.to_xml(),
        CopySource::Config(config) => format!("<config>{config}</config>"),
    };
    Rpc {
        body: format!(
            "<copy-config><target>{}</target><source>{source}</source></copy-config>",
            target.to_xml()
        ),
    }
}

pub fn delete_config(target: &Store) -> Rpc {
    Rpc {
        body: format!("<delete-config><target>{}</target></delete-config>", target.to_xml()),
    }
}

pub fn lock(target: &Store) -> Rpc {
    Rpc {
        body: format!("<lock><target>{}</target></lock>", target.to_xml()),
    }
}

pub fn unlock(target: &Store) -> Rpc {
    Rpc {
        body: format!("<unlock><target>{}</target></unlock>", target.to_xml()),
    }
}

pub fn kill_session(session_id: &str) -> Rpc {
    Rpc {
        body: format!(
            "<kill-session><session-id>{}</session-id></kill-session>",
            escape(session_id)
        ),
    }
}

pub fn get_schema(identifier: &str, version: Option<&str>, format: Option<&str>) -> Rpc {
    let mut body = format!(
        r#"<get-schema xmlns="{MONITORING_NS}"><identifier>{}</identifier>"#,
        escape(identifier)
    );
    if let Some(version) = version {
        body.push_str(&format!("<version>{}</version>", escape(version)));
    }
    if let Some(format_name) = format {
        body.push_str(&format!("<format>{}</format>", escape(format_name)));
    }
    body.push_str("</get-schema>");
    Rpc { body }
}

pub fn validate(source: &Store) -> Rpc {
    Rpc {
        body: format!("<validate><source>{}</source></validate>", source.to_xml()),
    }
}

pub fn subscribe(
    stream: Option<&str>,
    filter: Option<&str>,
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
) -> Rpc {
    let mut body = format!(r#"<create-subscription xmlns="{NOTIFICATION_NS}">"#);
    if let Some(stream) = stream {
        body.push_str(&format!("<stream>{}</stream>", escape(stream)));
    }
    if let Some(filter) = filter {
        body.push_str(&format!(r#"<filter type="subtree">{filter}</filter>"#));
    }
    if let Some(start) = start {
        body.push_str(&format!(
            "<startTime>{}</startTime>",
            start.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if let Some(stop) = stop {
        body.push_str(&format!(
            "<stopTime>{}</stopTime>",
            stop.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    body.push_str("</create-subscription>");
    Rpc { body }
}

pub fn close_session() -> Rpc {
    Rpc {
        body: "<close-session/>".to_string(),
    }
}

/// A caller-supplied operation used verbatim as the RPC body.
pub fn generic(content: &str) -> Rpc {
    Rpc {
        body: content.to_string(),
    }
}
