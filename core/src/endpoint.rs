//! Endpoint table: one entry per remote operation.
//!
//! Each `Endpoint` knows its HTTP method and its URL template relative to
//! the base URL. Templates name their identifiers with `:placeholder`
//! segments that `expand_path` fills in.

use serde::{Deserialize, Serialize};

use crate::http::HttpMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    AppList,
    AppCreate,
    AppDelete,
    AppRetrieve,
    MachineList,
    MachineCreate,
    MachineUpdate,
    MachineRetrieve,
    MachineDelete,
    MachineMetadataRetrieve,
    MachineMetadataUpdate,
    MachineMetadataDelete,
    MachinePs,
    MachineStart,
    MachineStop,
    MachineRestart,
    MachineCordon,
    MachineUncordon,
    MachineWait,
    MachineVersionsList,
    MachineLeaseRetrieve,
    MachineLeaseAcquire,
    MachineLeaseRelease,
    MachineSignal,
    MachineEventList,
    VolumeList,
    VolumeCreate,
    VolumeRetrieve,
    VolumeUpdate,
    VolumeDelete,
    VolumeExtend,
    VolumeSnapshotsList,
    VolumeSnapshotCreate,
}

impl Endpoint {
    pub fn method(self) -> HttpMethod {
        use Endpoint::*;
        match self {
            AppList | AppRetrieve | MachineList | MachineRetrieve | MachineMetadataRetrieve
            | MachinePs | MachineWait | MachineVersionsList | MachineLeaseRetrieve
            | MachineEventList | VolumeList | VolumeRetrieve | VolumeSnapshotsList => HttpMethod::Get,

            AppCreate | MachineCreate | MachineUpdate | MachineMetadataUpdate | MachineStart
            | MachineStop | MachineRestart | MachineCordon | MachineUncordon
            | MachineLeaseAcquire | MachineSignal | VolumeCreate | VolumeSnapshotCreate => {
                HttpMethod::Post
            }

            VolumeUpdate | VolumeExtend => HttpMethod::Put,

            AppDelete | MachineDelete | MachineMetadataDelete | MachineLeaseRelease
            | VolumeDelete => HttpMethod::Delete,
        }
    }

    pub fn template(self) -> &'static str {
        use Endpoint::*;
        match self {
            AppList | AppCreate => "/apps",
            AppDelete | AppRetrieve => "/apps/:app",
            MachineList | MachineCreate => "/apps/:app/machines",
            MachineUpdate | MachineRetrieve | MachineDelete => "/apps/:app/machines/:machine_id",
            MachineMetadataRetrieve => "/apps/:app/machines/:machine_id/metadata",
            MachineMetadataUpdate | MachineMetadataDelete => {
                "/apps/:app/machines/:machine_id/metadata/:key"
            }
            MachinePs => "/apps/:app/machines/:machine_id/ps",
            MachineStart => "/apps/:app/machines/:machine_id/start",
            MachineStop => "/apps/:app/machines/:machine_id/stop",
            MachineRestart => "/apps/:app/machines/:machine_id/restart",
            MachineCordon => "/apps/:app/machines/:machine_id/cordon",
            MachineUncordon => "/apps/:app/machines/:machine_id/uncordon",
            MachineWait => "/apps/:app/machines/:machine_id/wait",
            MachineVersionsList => "/apps/:app/machines/:machine_id/versions",
            MachineLeaseRetrieve | MachineLeaseAcquire | MachineLeaseRelease => {
                "/apps/:app/machines/:machine_id/lease"
            }
            MachineSignal => "/apps/:app/machines/:machine_id/signal",
            MachineEventList => "/apps/:app/machines/:machine_id/events",
            VolumeList | VolumeCreate => "/apps/:app/volumes",
            VolumeRetrieve | VolumeUpdate | VolumeDelete => "/apps/:app/volumes/:volume_id",
            VolumeExtend => "/apps/:app/volumes/:volume_id/extend",
            VolumeSnapshotsList | VolumeSnapshotCreate => "/apps/:app/volumes/:volume_id/snapshots",
        }
    }
}

/// Substitute every `:name` placeholder in `template` with its value from
/// `params`. Values are inserted verbatim. Placeholders without a value are
/// left as they are.
pub fn expand_path(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];

        match params.iter().find(|(k, _)| *k == name) {
            Some((_, value)) if !name.is_empty() => out.push_str(value),
            _ => {
                out.push(':');
                out.push_str(name);
            }
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}
