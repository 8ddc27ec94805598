//! Applies `edit-config` content to a [`SystemConfig`].
//!
//! Every node may carry an `operation` member overriding the operation
//! inherited from its parent; the root inherits `default-operation`. Leaves
//! set to `null` are deleted.

use serde_json::{Map, Value};

use netkeep_proto::{ErrorTag, RpcError};

use super::{AssociationType, NtpConfig, NtpServer, SystemConfig, Timezone, UdpAddress};

const OPERATION: &str = "operation";

/// Time zone names accepted for `timezone-name`.
const TIMEZONE_NAMES: &[&str] = &[
    "UTC",
    "Africa/Cairo",
    "Africa/Johannesburg",
    "Africa/Lagos",
    "Africa/Nairobi",
    "America/Anchorage",
    "America/Chicago",
    "America/Denver",
    "America/Los_Angeles",
    "America/New_York",
    "America/Sao_Paulo",
    "America/Toronto",
    "Asia/Dubai",
    "Asia/Hong_Kong",
    "Asia/Kolkata",
    "Asia/Shanghai",
    "Asia/Singapore",
    "Asia/Tokyo",
    "Australia/Adelaide",
    "Australia/Perth",
    "Australia/Sydney",
    "Europe/Berlin",
    "Europe/Dublin",
    "Europe/Helsinki",
    "Europe/Lisbon",
    "Europe/London",
    "Europe/Madrid",
    "Europe/Moscow",
    "Europe/Paris",
    "Europe/Prague",
    "Europe/Rome",
    "Europe/Vienna",
    "Europe/Warsaw",
    "Pacific/Auckland",
    "Pacific/Honolulu",
];

/// UTC offsets, in minutes, that map onto a zone rule.
const UTC_OFFSETS: &[i16] = &[
    -660, -600, -570, -540, -480, -420, -360, -300, -270, -240, -180, -120, -60, 0, 60, 120, 180,
    210, 240, 270, 300, 330, 345, 360, 390, 420, 480, 525, 540, 570, 600, 630, 660, 690, 720, 765,
    780, 840,
];

/// Per-node edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

impl EditOperation {
    fn parse(value: &Value) -> Result<Self, RpcError> {
        match value.as_str() {
            Some("merge") => Ok(Self::Merge),
            Some("replace") => Ok(Self::Replace),
            Some("create") => Ok(Self::Create),
            Some("delete") => Ok(Self::Delete),
            Some("remove") => Ok(Self::Remove),
            _ => Err(RpcError::bad_element(OPERATION).with_message("unknown edit operation")),
        }
    }

    /// Operation children inherit once this node has been handled.
    const fn for_children(self) -> Self {
        match self {
            Self::Replace => Self::Merge,
            other => other,
        }
    }
}

/// Returns the edit addressed to `namespace`, if any.
pub(super) fn namespace_edit<'a>(content: &'a Value, namespace: &str) -> Option<&'a Value> {
    content.get("config")?.get(namespace)
}

/// Reads `default-operation`, which defaults to merge.
pub(super) fn default_operation(content: &Value) -> Result<EditOperation, RpcError> {
    match content.get("default-operation") {
        None => Ok(EditOperation::Merge),
        Some(value) => match value.as_str() {
            Some("merge" | "none") => Ok(EditOperation::Merge),
            Some("replace") => Ok(EditOperation::Replace),
            _ => Err(RpcError::invalid_value("default-operation")),
        },
    }
}

/// Applies `edit` (the namespace body) to `config`.
pub(super) fn apply(
    config: &mut SystemConfig,
    edit: &Value,
    inherited: EditOperation,
) -> Result<(), RpcError> {
    let members = as_object(edit, "config")?;
    for (key, node) in members {
        match key.as_str() {
            "system" => apply_system(config, node, inherited)?,
            _ => return Err(unknown_element(key)),
        }
    }
    Ok(())
}

fn apply_system(
    config: &mut SystemConfig,
    node: &Value,
    inherited: EditOperation,
) -> Result<(), RpcError> {
    if node.is_null() {
        *config = SystemConfig::default();
        return Ok(());
    }
    let members = as_object(node, "system")?;
    let operation = node_operation(members, inherited)?;
    match operation {
        EditOperation::Create => return Err(data_exists("system")),
        EditOperation::Delete | EditOperation::Remove => {
            *config = SystemConfig::default();
            return Ok(());
        }
        EditOperation::Replace => *config = SystemConfig::default(),
        EditOperation::Merge => {}
    }
    let child_operation = operation.for_children();
    for (key, child) in members {
        match key.as_str() {
            OPERATION => {}
            "hostname" => apply_hostname(config, child, child_operation)?,
            "clock" => apply_clock(&mut config.clock, child, child_operation)?,
            "ntp" => apply_ntp(&mut config.ntp, child, child_operation)?,
            _ => return Err(unknown_element(key)),
        }
    }
    Ok(())
}

fn apply_hostname(
    config: &mut SystemConfig,
    node: &Value,
    operation: EditOperation,
) -> Result<(), RpcError> {
    match (node, operation) {
        (Value::Null, _) | (_, EditOperation::Delete | EditOperation::Remove) => {
            config.hostname = SystemConfig::default().hostname;
            Ok(())
        }
        (Value::String(hostname), _) if valid_hostname(hostname) => {
            config.hostname.clone_from(hostname);
            Ok(())
        }
        _ => Err(RpcError::invalid_value("hostname")),
    }
}

fn valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= 253
        && hostname.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn apply_clock(
    clock: &mut Option<Timezone>,
    node: &Value,
    inherited: EditOperation,
) -> Result<(), RpcError> {
    if node.is_null() {
        *clock = None;
        return Ok(());
    }
    let members = as_object(node, "clock")?;
    match node_operation(members, inherited)? {
        EditOperation::Delete if clock.is_none() => return Err(data_missing("clock")),
        EditOperation::Delete | EditOperation::Remove => {
            *clock = None;
            return Ok(());
        }
        EditOperation::Create if clock.is_some() => return Err(data_exists("clock")),
        EditOperation::Replace => *clock = None,
        EditOperation::Create | EditOperation::Merge => {}
    }

    let mut name = None;
    let mut offset = None;
    for (key, child) in members {
        match key.as_str() {
            OPERATION => {}
            "timezone-name" => name = Some(child),
            "timezone-utc-offset" => offset = Some(child),
            _ => return Err(unknown_element(key)),
        }
    }
    let name = name.filter(|value| !value.is_null());
    let offset = offset.filter(|value| !value.is_null());
    match (name, offset) {
        (Some(_), Some(_)) => Err(RpcError::invalid_value("timezone-utc-offset")
            .with_message("timezone-name and timezone-utc-offset are mutually exclusive")),
        (Some(name), None) => {
            *clock = Some(Timezone::TimezoneName(parse_timezone_name(name)?));
            Ok(())
        }
        (None, Some(offset)) => {
            *clock = Some(Timezone::TimezoneUtcOffset(parse_utc_offset(offset)?));
            Ok(())
        }
        (None, None) => {
            if members
                .iter()
                .any(|(key, value)| key != OPERATION && value.is_null())
            {
                *clock = None;
            }
            Ok(())
        }
    }
}

fn parse_timezone_name(value: &Value) -> Result<String, RpcError> {
    value
        .as_str()
        .filter(|name| TIMEZONE_NAMES.contains(name))
        .map(str::to_owned)
        .ok_or_else(|| {
            RpcError::invalid_value("timezone-name").with_message("unknown time zone name")
        })
}

fn parse_utc_offset(value: &Value) -> Result<i16, RpcError> {
    value
        .as_i64()
        .and_then(|minutes| i16::try_from(minutes).ok())
        .filter(|minutes| UTC_OFFSETS.contains(minutes))
        .ok_or_else(|| {
            RpcError::invalid_value("timezone-utc-offset").with_message("unsupported UTC offset")
        })
}

fn apply_ntp(ntp: &mut NtpConfig, node: &Value, inherited: EditOperation) -> Result<(), RpcError> {
    if node.is_null() {
        *ntp = NtpConfig::default();
        return Ok(());
    }
    let members = as_object(node, "ntp")?;
    let operation = node_operation(members, inherited)?;
    match operation {
        EditOperation::Create => return Err(data_exists("ntp")),
        EditOperation::Delete | EditOperation::Remove => {
            *ntp = NtpConfig::default();
            return Ok(());
        }
        EditOperation::Replace => *ntp = NtpConfig::default(),
        EditOperation::Merge => {}
    }
    let child_operation = operation.for_children();
    for (key, child) in members {
        match key.as_str() {
            OPERATION => {}
            "enabled" => match child {
                Value::Bool(enabled) => ntp.enabled = *enabled,
                Value::Null => ntp.enabled = false,
                _ => return Err(RpcError::invalid_value("enabled")),
            },
            "server" => match child {
                Value::Array(entries) => {
                    for entry in entries {
                        apply_server(&mut ntp.server, entry, child_operation)?;
                    }
                }
                Value::Null => ntp.server.clear(),
                entry => apply_server(&mut ntp.server, entry, child_operation)?,
            },
            _ => return Err(unknown_element(key)),
        }
    }
    Ok(())
}

fn apply_server(
    servers: &mut Vec<NtpServer>,
    node: &Value,
    inherited: EditOperation,
) -> Result<(), RpcError> {
    let members = as_object(node, "server")?;
    let operation = node_operation(members, inherited)?;
    let name = match members.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        Some(_) => return Err(RpcError::invalid_value("name")),
        None => return Err(RpcError::missing_element("name")),
    };
    let position = servers.iter().position(|server| server.name == name);

    match (operation, position) {
        (EditOperation::Delete, None) => Err(data_missing("server")),
        (EditOperation::Delete | EditOperation::Remove, Some(index)) => {
            servers.remove(index);
            Ok(())
        }
        (EditOperation::Remove, None) => Ok(()),
        (EditOperation::Create, Some(_)) => Err(data_exists("server")),
        (EditOperation::Merge, Some(index)) => {
            let Some(existing) = servers.get_mut(index) else {
                return Err(RpcError::operation_failed());
            };
            merge_server(existing, members)
        }
        (EditOperation::Replace, Some(index)) => {
            let replacement = build_server(name, members)?;
            if let Some(slot) = servers.get_mut(index) {
                *slot = replacement;
            }
            Ok(())
        }
        (EditOperation::Create | EditOperation::Merge | EditOperation::Replace, None) => {
            servers.push(build_server(name, members)?);
            Ok(())
        }
    }
}

fn build_server(name: String, members: &Map<String, Value>) -> Result<NtpServer, RpcError> {
    let mut server = NtpServer {
        name,
        udp: UdpAddress {
            address: String::new(),
        },
        association_type: AssociationType::default(),
    };
    merge_server(&mut server, members)?;
    if server.udp.address.is_empty() {
        return Err(RpcError::missing_element("address"));
    }
    Ok(server)
}

fn merge_server(server: &mut NtpServer, members: &Map<String, Value>) -> Result<(), RpcError> {
    for (key, child) in members {
        match key.as_str() {
            OPERATION | "name" => {}
            "udp" => {
                let udp = as_object(child, "udp")?;
                for (udp_key, udp_value) in udp {
                    match (udp_key.as_str(), udp_value) {
                        ("address", Value::String(address)) if !address.is_empty() => {
                            server.udp.address.clone_from(address);
                        }
                        ("address", _) => return Err(RpcError::invalid_value("address")),
                        (other, _) => return Err(unknown_element(other)),
                    }
                }
            }
            "association-type" => {
                server.association_type = serde_json::from_value(child.clone())
                    .map_err(|_| RpcError::invalid_value("association-type"))?;
            }
            _ => return Err(unknown_element(key)),
        }
    }
    Ok(())
}

fn node_operation(
    members: &Map<String, Value>,
    inherited: EditOperation,
) -> Result<EditOperation, RpcError> {
    members
        .get(OPERATION)
        .map_or(Ok(inherited), EditOperation::parse)
}

fn as_object<'a>(value: &'a Value, element: &str) -> Result<&'a Map<String, Value>, RpcError> {
    value
        .as_object()
        .ok_or_else(|| RpcError::invalid_value(element).with_message("expected a container"))
}

fn unknown_element(element: &str) -> RpcError {
    RpcError::new(ErrorTag::UnknownElement).with_bad_element(element)
}

fn data_exists(element: &str) -> RpcError {
    RpcError::new(ErrorTag::DataExists).with_bad_element(element)
}

fn data_missing(element: &str) -> RpcError {
    RpcError::new(ErrorTag::DataMissing).with_bad_element(element)
}
