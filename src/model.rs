//! Data model - Service Providers, attribute mappings and key pairs
//!
//! Records mirror the rows of the three store tables. Matches and patches are
//! the typed form of "column = value" conditions and assignments: every value
//! they carry ends up as a bound statement parameter.

use crate::storage::schema::{attr_col, sp_col};
use crate::{Error, Result};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default name-ID source attribute
pub const DEFAULT_NAMEID_ATTR: &str = "emailAddress";

/// Default key-pair algorithm
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "RS256";

/// Federation protocol spoken with the SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "SAML")]
    Saml,
    #[serde(rename = "WS-Fed")]
    WsFed,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Saml => "SAML",
            Protocol::WsFed => "WS-Fed",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "saml" => Ok(Protocol::Saml),
            "ws-fed" | "wsfed" | "ws-federation" => Ok(Protocol::WsFed),
            _ => Err(Error::InvalidValue(format!("Unknown protocol type: {}", s))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binding used to deliver logout messages to the SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogoutBinding {
    #[default]
    HttpRedirect,
    HttpPost,
}

impl LogoutBinding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutBinding::HttpRedirect => "HttpRedirect",
            LogoutBinding::HttpPost => "HttpPost",
        }
    }
}

impl FromStr for LogoutBinding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "httpredirect" | "redirect" => Ok(LogoutBinding::HttpRedirect),
            "httppost" | "post" => Ok(LogoutBinding::HttpPost),
            _ => Err(Error::InvalidValue(format!("Unknown logout binding: {}", s))),
        }
    }
}

impl std::fmt::Display for LogoutBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of claim an attribute mapping produces.
///
/// Stored as a small integer: 0 for a plain claim, 1 for the claim that
/// carries the user's group memberships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    Normal,
    Group,
}

impl AttributeKind {
    pub fn code(&self) -> i64 {
        match self {
            AttributeKind::Normal => 0,
            AttributeKind::Group => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(AttributeKind::Normal),
            1 => Ok(AttributeKind::Group),
            _ => Err(Error::InvalidValue(format!("Unknown attribute kind: {}", code))),
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeKind::Normal => write!(f, "normal"),
            AttributeKind::Group => write!(f, "group"),
        }
    }
}

/// A registered Service Provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProvider {
    pub id: i64,
    /// Display name shown in the admin screen
    pub name: String,
    /// Entity ID / realm the SP identifies itself with
    pub issuer: String,
    /// Assertion Consumer Service URL responses are posted to
    pub acs_url: String,
    /// Certificate used to verify SP-signed requests
    pub signing_cert: Option<String>,
    /// Certificate used to encrypt assertions for the SP
    pub encryption_cert: Option<String>,
    pub nameid_format: String,
    /// User attribute whose value becomes the NameID
    pub nameid_attr: String,
    pub response_signed: bool,
    pub assertion_signed: bool,
    pub assertion_encrypted: bool,
    pub group_mapping_enabled: bool,
    pub default_relay_state: Option<String>,
    pub logout_url: Option<String>,
    pub logout_binding: LogoutBinding,
    pub protocol: Protocol,
}

/// Field set for registering a new Service Provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServiceProvider {
    pub name: String,
    pub issuer: String,
    pub acs_url: String,
    pub signing_cert: Option<String>,
    pub encryption_cert: Option<String>,
    pub nameid_format: String,
    pub nameid_attr: String,
    pub response_signed: bool,
    pub assertion_signed: bool,
    pub assertion_encrypted: bool,
    pub group_mapping_enabled: bool,
    pub default_relay_state: Option<String>,
    pub logout_url: Option<String>,
    pub logout_binding: LogoutBinding,
    pub protocol: Protocol,
}

impl NewServiceProvider {
    /// Create a SAML SP with the unspecified NameID format and defaults elsewhere
    pub fn new(
        name: impl Into<String>,
        issuer: impl Into<String>,
        acs_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            acs_url: acs_url.into(),
            signing_cert: None,
            encryption_cert: None,
            nameid_format: "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified".to_string(),
            nameid_attr: DEFAULT_NAMEID_ATTR.to_string(),
            response_signed: false,
            assertion_signed: false,
            assertion_encrypted: false,
            group_mapping_enabled: false,
            default_relay_state: None,
            logout_url: None,
            logout_binding: LogoutBinding::default(),
            protocol: Protocol::default(),
        }
    }

    pub fn with_nameid_format(mut self, format: impl Into<String>) -> Self {
        self.nameid_format = format.into();
        self
    }

    pub fn with_nameid_attr(mut self, attr: impl Into<String>) -> Self {
        self.nameid_attr = attr.into();
        self
    }

    pub fn with_signing_cert(mut self, cert: impl Into<String>) -> Self {
        self.signing_cert = Some(cert.into());
        self
    }

    pub fn with_encryption_cert(mut self, cert: impl Into<String>) -> Self {
        self.encryption_cert = Some(cert.into());
        self
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.default_relay_state = Some(relay_state.into());
        self
    }

    pub fn with_logout(mut self, url: impl Into<String>, binding: LogoutBinding) -> Self {
        self.logout_url = Some(url.into());
        self.logout_binding = binding;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the response-signed, assertion-signed and assertion-encrypted flags
    pub fn with_signing(mut self, response: bool, assertion: bool, encrypted: bool) -> Self {
        self.response_signed = response;
        self.assertion_signed = assertion;
        self.assertion_encrypted = encrypted;
        self
    }

    pub fn with_group_mapping(mut self, enabled: bool) -> Self {
        self.group_mapping_enabled = enabled;
        self
    }
}

/// Partial update of a Service Provider.
///
/// `None` leaves a column untouched. Nullable columns take
/// `Some(None)` to clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpPatch {
    pub name: Option<String>,
    pub issuer: Option<String>,
    pub acs_url: Option<String>,
    pub signing_cert: Option<Option<String>>,
    pub encryption_cert: Option<Option<String>>,
    pub nameid_format: Option<String>,
    pub nameid_attr: Option<String>,
    pub response_signed: Option<bool>,
    pub assertion_signed: Option<bool>,
    pub assertion_encrypted: Option<bool>,
    pub group_mapping_enabled: Option<bool>,
    pub default_relay_state: Option<Option<String>>,
    pub logout_url: Option<Option<String>>,
    pub logout_binding: Option<LogoutBinding>,
    pub protocol: Option<Protocol>,
}

impl SpPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    /// Column/value pairs for the SET clause, in table column order
    pub(crate) fn assignments(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_text(&mut out, sp_col::NAME, &self.name);
        push_text(&mut out, sp_col::ISSUER, &self.issuer);
        push_text(&mut out, sp_col::ACS_URL, &self.acs_url);
        push_nullable(&mut out, sp_col::SIGNING_CERT, &self.signing_cert);
        push_nullable(&mut out, sp_col::ENCRYPTION_CERT, &self.encryption_cert);
        push_text(&mut out, sp_col::NAMEID_FORMAT, &self.nameid_format);
        push_text(&mut out, sp_col::NAMEID_ATTR, &self.nameid_attr);
        push_flag(&mut out, sp_col::RESPONSE_SIGNED, self.response_signed);
        push_flag(&mut out, sp_col::ASSERTION_SIGNED, self.assertion_signed);
        push_flag(&mut out, sp_col::ASSERTION_ENCRYPTED, self.assertion_encrypted);
        push_flag(&mut out, sp_col::GROUP_MAPPING_ENABLED, self.group_mapping_enabled);
        push_nullable(&mut out, sp_col::DEFAULT_RELAY_STATE, &self.default_relay_state);
        push_nullable(&mut out, sp_col::LOGOUT_URL, &self.logout_url);
        if let Some(binding) = self.logout_binding {
            out.push((sp_col::LOGOUT_BINDING_TYPE, Value::Text(binding.as_str().to_string())));
        }
        if let Some(protocol) = self.protocol {
            out.push((sp_col::PROTOCOL_TYPE, Value::Text(protocol.as_str().to_string())));
        }
        out
    }
}

fn push_text(out: &mut Vec<(&'static str, Value)>, col: &'static str, v: &Option<String>) {
    if let Some(v) = v {
        out.push((col, Value::Text(v.clone())));
    }
}

fn push_nullable(out: &mut Vec<(&'static str, Value)>, col: &'static str, v: &Option<Option<String>>) {
    match v {
        Some(Some(v)) => out.push((col, Value::Text(v.clone()))),
        Some(None) => out.push((col, Value::Null)),
        None => {}
    }
}

fn push_flag(out: &mut Vec<(&'static str, Value)>, col: &'static str, v: Option<bool>) {
    if let Some(v) = v {
        out.push((col, Value::Integer(v as i64)));
    }
}

/// Conjunction of equality conditions on the SP table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpMatch {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub issuer: Option<String>,
    pub acs_url: Option<String>,
}

impl SpMatch {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_issuer(issuer: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub(crate) fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        if let Some(id) = self.id {
            out.push((sp_col::ID, Value::Integer(id)));
        }
        push_text(&mut out, sp_col::NAME, &self.name);
        push_text(&mut out, sp_col::ISSUER, &self.issuer);
        push_text(&mut out, sp_col::ACS_URL, &self.acs_url);
        out
    }
}

/// Conjunction of equality conditions on the attribute table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMatch {
    pub id: Option<i64>,
    pub sp_id: Option<i64>,
    pub name: Option<String>,
    pub kind: Option<AttributeKind>,
}

impl AttributeMatch {
    pub fn by_sp(sp_id: i64) -> Self {
        Self {
            sp_id: Some(sp_id),
            ..Self::default()
        }
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: AttributeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub(crate) fn conditions(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        if let Some(id) = self.id {
            out.push((attr_col::ID, Value::Integer(id)));
        }
        if let Some(sp_id) = self.sp_id {
            out.push((attr_col::SP_ID, Value::Integer(sp_id)));
        }
        push_text(&mut out, attr_col::NAME, &self.name);
        if let Some(kind) = self.kind {
            out.push((attr_col::KIND, Value::Integer(kind.code())));
        }
        out
    }
}

/// A claim emitted for an SP: `name` is the claim name sent to the SP and
/// `value` is the user attribute (or expression) it is filled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    pub id: i64,
    pub sp_id: i64,
    pub name: String,
    pub value: String,
    pub kind: AttributeKind,
}

/// Signing/encryption key material for one SP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Owning SP id, stored as text
    pub client_id: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub encryption_algorithm: String,
}

impl KeyPair {
    /// The owning SP id, if the client id is numeric
    pub fn sp_id(&self) -> Option<i64> {
        self.client_id.parse().ok()
    }
}
