//! Field-level metadata comparison between matched track pairs.

use crate::catalog::{ManagedTrack, MetadataField, SourceTrack, TrackIdentity};

/// One field whose managed value differs from the source value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub identity: TrackIdentity,
    pub field: MetadataField,
    pub old_value: String,
    pub new_value: String,
}

/// Computes the changes needed to make `managed` agree with `source`.
///
/// Values are compared with exact string equality; no case folding or
/// whitespace trimming. The managed artist is the effective artist credit.
pub fn diff_track(managed: &ManagedTrack, source: &SourceTrack) -> Vec<FieldChange> {
    MetadataField::ALL
        .into_iter()
        .filter_map(|field| {
            let current = managed.field_value(field);
            let wanted = source.field_value(field);
            (current != wanted).then(|| FieldChange {
                identity: managed.identity.clone(),
                field,
                old_value: current.to_string(),
                new_value: wanted.to_string(),
            })
        })
        .collect()
}
