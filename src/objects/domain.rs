//! Domain object service (`urn:ietf:params:xml:ns:domain-1.0`).
//!
//! Typed payloads for the availability check and the transfer data carried
//! by poll notifications. Other domain elements decode as [`RawPayload`] so
//! that they still reach the dispatcher.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::codec::{DecodeError, Element};
use crate::protocol::{EppResult, Payload, RawPayload, Response, ResultCode};
use crate::session::{CommandEvent, CommandHandler, Fault, Session};

/// Domain service namespace.
pub const DOMAIN_NS: &str = "urn:ietf:params:xml:ns:domain-1.0";

/// Preferred prefix.
pub const DOMAIN_PREFIX: &str = "domain";

/// Schema location advertised for the service.
pub const DOMAIN_SCHEMA: &str = "urn:ietf:params:xml:ns:domain-1.0 domain-1.0.xsd";

fn domain(name: &str) -> Element {
    Element::new(DOMAIN_NS, name).with_prefix(DOMAIN_PREFIX)
}

/// `<domain:check>`: names to check for availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCheck {
    /// Fully qualified names
    pub names: Vec<String>,
}

impl DomainCheck {
    /// Check the given names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    fn from_element(element: &Element) -> Result<Self, DecodeError> {
        let names: Vec<String> = element
            .children_named(DOMAIN_NS, "name")
            .map(|n| n.text.clone())
            .collect();
        if names.is_empty() || names.iter().any(String::is_empty) {
            return Err(DecodeError::missing("domain:check/domain:name"));
        }
        Ok(Self { names })
    }
}

impl Payload for DomainCheck {
    fn namespace(&self) -> &str {
        DOMAIN_NS
    }

    fn element_name(&self) -> &str {
        "check"
    }

    fn to_element(&self) -> Element {
        self.names
            .iter()
            .fold(domain("check"), |el, name| el.with_text_child("name", name.as_str()))
    }
}

/// Availability of one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Checked name
    pub name: String,
    /// Whether the name can be provisioned
    pub available: bool,
    /// Why the name is unavailable
    pub reason: Option<String>,
}

impl CheckResult {
    /// Available name.
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            reason: None,
        }
    }

    /// Unavailable name with a reason.
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// `<domain:chkData>`: one result per checked name, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCheckData {
    /// Check results
    pub results: Vec<CheckResult>,
}

impl DomainCheckData {
    fn from_element(element: &Element) -> Result<Self, DecodeError> {
        let mut results = Vec::new();
        for cd in element.children_named(DOMAIN_NS, "cd") {
            let name = cd.required_child(DOMAIN_NS, "name")?;
            let available = parse_bool("domain:name@avail", name.required_attr("avail")?)?;
            results.push(CheckResult {
                name: name.text.clone(),
                available,
                reason: cd.child_text(DOMAIN_NS, "reason").map(str::to_string),
            });
        }
        Ok(Self { results })
    }

    /// Result for a name.
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl Payload for DomainCheckData {
    fn namespace(&self) -> &str {
        DOMAIN_NS
    }

    fn element_name(&self) -> &str {
        "chkData"
    }

    fn to_element(&self) -> Element {
        domain("chkData").with_children(self.results.iter().map(|r| {
            let mut cd = domain("cd").with_child(
                domain("name")
                    .with_attr("avail", if r.available { "1" } else { "0" })
                    .with_text(r.name.as_str()),
            );
            if let Some(reason) = &r.reason {
                cd = cd.with_text_child("reason", reason.as_str());
            }
            cd
        }))
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, DecodeError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(DecodeError::invalid(field, value)),
    }
}

/// State of a transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Approved by the sponsoring client
    ClientApproved,
    /// Cancelled by the requesting client
    ClientCancelled,
    /// Rejected by the sponsoring client
    ClientRejected,
    /// Awaiting action
    Pending,
    /// Approved by the server
    ServerApproved,
    /// Cancelled by the server
    ServerCancelled,
}

impl TransferStatus {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientApproved => "clientApproved",
            Self::ClientCancelled => "clientCancelled",
            Self::ClientRejected => "clientRejected",
            Self::Pending => "pending",
            Self::ServerApproved => "serverApproved",
            Self::ServerCancelled => "serverCancelled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clientApproved" => Ok(Self::ClientApproved),
            "clientCancelled" => Ok(Self::ClientCancelled),
            "clientRejected" => Ok(Self::ClientRejected),
            "pending" => Ok(Self::Pending),
            "serverApproved" => Ok(Self::ServerApproved),
            "serverCancelled" => Ok(Self::ServerCancelled),
            _ => Err(DecodeError::invalid("domain:trStatus", s)),
        }
    }
}

/// `<domain:trnData>`: transfer state, delivered in transfer responses and
/// poll notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTransferData {
    /// Domain name
    pub name: String,
    /// Transfer state
    pub status: TransferStatus,
    /// Client that requested the transfer
    pub requesting_client: String,
    /// When the transfer was requested
    pub requested_at: DateTime<Utc>,
    /// Client that should act on the request
    pub acting_client: String,
    /// When action is due or was taken
    pub acted_at: DateTime<Utc>,
    /// New expiry date, if the transfer changes it
    pub expires_at: Option<DateTime<Utc>>,
}

impl DomainTransferData {
    fn from_element(element: &Element) -> Result<Self, DecodeError> {
        let date = |name: &str| -> Result<DateTime<Utc>, DecodeError> {
            let text = element.required_text(DOMAIN_NS, name)?;
            parse_date(name, text)
        };
        Ok(Self {
            name: element.required_text(DOMAIN_NS, "name")?.to_string(),
            status: element.required_text(DOMAIN_NS, "trStatus")?.parse()?,
            requesting_client: element.required_text(DOMAIN_NS, "reID")?.to_string(),
            requested_at: date("reDate")?,
            acting_client: element.required_text(DOMAIN_NS, "acID")?.to_string(),
            acted_at: date("acDate")?,
            expires_at: element
                .child_text(DOMAIN_NS, "exDate")
                .map(|d| parse_date("exDate", d))
                .transpose()?,
        })
    }
}

impl Payload for DomainTransferData {
    fn namespace(&self) -> &str {
        DOMAIN_NS
    }

    fn element_name(&self) -> &str {
        "trnData"
    }

    fn to_element(&self) -> Element {
        let element = domain("trnData")
            .with_text_child("name", self.name.as_str())
            .with_text_child("trStatus", self.status.as_str())
            .with_text_child("reID", self.requesting_client.as_str())
            .with_text_child("reDate", format_date(&self.requested_at))
            .with_text_child("acID", self.acting_client.as_str())
            .with_text_child("acDate", format_date(&self.acted_at));
        match &self.expires_at {
            Some(expiry) => element.with_text_child("exDate", format_date(expiry)),
            None => element,
        }
    }
}

fn parse_date(field: &str, value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| DecodeError::invalid(format!("domain:{field}"), value))
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Service factory: typed payloads where known, raw otherwise.
pub fn decode(element: &Element) -> Result<Box<dyn Payload>, DecodeError> {
    Ok(match element.name.as_str() {
        "check" => Box::new(DomainCheck::from_element(element)?),
        "chkData" => Box::new(DomainCheckData::from_element(element)?),
        "trnData" => Box::new(DomainTransferData::from_element(element)?),
        _ => Box::new(RawPayload(element.clone())),
    })
}

/// Answers `domain:check` against a fixed set of provisioned names.
#[derive(Debug, Clone, Default)]
pub struct DomainCheckHandler {
    provisioned: HashSet<String>,
}

impl DomainCheckHandler {
    /// Handler treating `provisioned` as taken; matching is case-insensitive.
    pub fn new<I, S>(provisioned: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            provisioned: provisioned
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl CommandHandler for DomainCheckHandler {
    fn execute(&self, event: &CommandEvent<'_>, _session: &Session) -> Result<Response, Fault> {
        let check = event
            .command()
            .payload::<DomainCheck>()
            .ok_or_else(|| Fault::new(ResultCode::CommandSyntaxError).with_reason("expected domain:check"))?;

        let results = check
            .names
            .iter()
            .map(|name| {
                if self.provisioned.contains(&name.to_ascii_lowercase()) {
                    CheckResult::unavailable(name.as_str(), "In use")
                } else {
                    CheckResult::available(name.as_str())
                }
            })
            .collect();

        Ok(Response::new(EppResult::new(ResultCode::Success), event.trans_id().clone())
            .with_res_data(DomainCheckData { results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reparse(payload: &dyn Payload) -> Box<dyn Payload> {
        decode(&payload.to_element()).unwrap()
    }

    #[test]
    fn test_check_requires_a_name() {
        let empty = domain("check");
        assert_eq!(
            decode(&empty).unwrap_err(),
            DecodeError::missing("domain:check/domain:name")
        );
    }

    #[test]
    fn test_chk_data_avail_values() {
        let element = domain("chkData").with_child(
            domain("cd").with_child(domain("name").with_attr("avail", "true").with_text("a.example")),
        );
        let decoded = decode(&element).unwrap();
        let data = decoded.downcast_ref::<DomainCheckData>().unwrap();
        assert!(data.get("a.example").unwrap().available);

        let bad = domain("chkData").with_child(
            domain("cd").with_child(domain("name").with_attr("avail", "maybe").with_text("a.example")),
        );
        assert!(matches!(decode(&bad), Err(DecodeError::InvalidValue { .. })));
    }

    #[test]
    fn test_transfer_data_roundtrip() {
        let data = DomainTransferData {
            name: "example.com".to_string(),
            status: TransferStatus::Pending,
            requesting_client: "ClientX".to_string(),
            requested_at: Utc::now(),
            acting_client: "ClientY".to_string(),
            acted_at: Utc::now(),
            expires_at: None,
        };
        let decoded = reparse(&data);
        assert_eq!(decoded.downcast_ref::<DomainTransferData>(), Some(&data));
    }

    #[test]
    fn test_unknown_element_decodes_raw() {
        let info = domain("info").with_text_child("name", "example.com");
        let decoded = decode(&info).unwrap();
        assert!(decoded.is::<RawPayload>());
    }

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,20}\\.(com|net|example)"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_check_roundtrip(names in prop::collection::vec(arb_name(), 1..8)) {
            let check = DomainCheck::new(names);
            let decoded = reparse(&check);
            prop_assert_eq!(decoded.downcast_ref::<DomainCheck>(), Some(&check));
        }

        #[test]
        fn prop_chk_data_roundtrip(
            entries in prop::collection::vec((arb_name(), any::<bool>()), 0..8)
        ) {
            let data = DomainCheckData {
                results: entries
                    .into_iter()
                    .map(|(name, avail)| if avail {
                        CheckResult::available(name)
                    } else {
                        CheckResult::unavailable(name, "In use")
                    })
                    .collect(),
            };
            let decoded = reparse(&data);
            prop_assert_eq!(decoded.downcast_ref::<DomainCheckData>(), Some(&data));
        }
    }
}
