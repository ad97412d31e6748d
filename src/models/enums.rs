use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        $(#[$meta])*
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(
    /// Application status as tracked by the user.
    JobStatus {
        Applied => "applied",
        Interview => "interview",
        Declined => "declined",
        Offer => "offer",
    }
);

impl JobStatus {
    /// Position in the progression `Applied → Interview → {Declined|Offer}`.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Applied => 0,
            Self::Interview => 1,
            Self::Declined | Self::Offer => 2,
        }
    }

    /// Declined and Offer end the application.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Offer)
    }

    /// Case-insensitive match on the exact labels only. Keyword mapping
    /// of free text lives in the response normalizer.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "applied" => Some(Self::Applied),
            "interview" => Some(Self::Interview),
            "declined" => Some(Self::Declined),
            "offer" => Some(Self::Offer),
            _ => None,
        }
    }
}

str_enum!(
    /// Provenance of a record. Drives cache TTL and auto-modification rights.
    #[serde(rename_all = "snake_case")]
    RecordSource {
        AutoInferred => "auto_inferred",
        ManualCreated => "manual_created",
        ManualEdited => "manual_edited",
        Hybrid => "hybrid",
    }
);

impl RecordSource {
    fn rank(&self) -> u8 {
        match self {
            Self::AutoInferred => 0,
            Self::ManualCreated => 1,
            Self::ManualEdited => 2,
            Self::Hybrid => 3,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::ManualCreated | Self::ManualEdited)
    }

    /// Source after the user edits a record by hand.
    pub fn after_user_edit(self) -> Self {
        match self {
            Self::AutoInferred | Self::ManualCreated => Self::ManualEdited,
            other => other,
        }
    }

    /// Source after values from `incoming` are merged into a record of this
    /// source. Mixing automatic and manual provenance yields `Hybrid`; the
    /// result never ranks below `self`.
    pub fn merged_with(self, incoming: Self) -> Self {
        if self == incoming {
            return self;
        }
        let mixes_provenance = (self == Self::AutoInferred && incoming != Self::AutoInferred)
            || (self != Self::AutoInferred && incoming == Self::AutoInferred);
        let candidate = if mixes_provenance || incoming == Self::Hybrid {
            Self::Hybrid
        } else {
            incoming
        };
        if candidate.rank() >= self.rank() {
            candidate
        } else {
            self
        }
    }
}

str_enum!(
    /// Stage 1 risk that the email is a false positive.
    #[serde(rename_all = "snake_case")]
    RiskLevel {
        None => "none",
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

str_enum!(
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    DuplicateRisk {
        None => "none",
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
);

impl DuplicateRisk {
    pub fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

str_enum!(
    #[serde(rename_all = "snake_case")]
    ConflictSeverity {
        None => "none",
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

str_enum!(
    #[serde(rename_all = "snake_case")]
    ConflictType {
        ValueMismatch => "value_mismatch",
        MissingExisting => "missing_existing",
        StatusProgression => "status_progression",
        StatusRegression => "status_regression",
    }
);

str_enum!(
    #[serde(rename_all = "kebab-case")]
    ResolutionStrategy {
        PreferManual => "prefer-manual",
        PreferNewSource => "prefer-new-source",
        MergeByCompleteness => "merge-by-completeness",
        Hybrid => "hybrid",
        FlagForReview => "flag-for-review",
    }
);

str_enum!(
    #[serde(rename_all = "snake_case")]
    RecordField {
        Company => "company",
        Position => "position",
        Status => "status",
        Location => "location",
    }
);

impl RecordField {
    pub fn all() -> &'static [RecordField] {
        &[Self::Company, Self::Position, Self::Status, Self::Location]
    }
}

str_enum!(
    #[serde(rename_all = "snake_case")]
    ReviewStatus {
        Pending => "pending",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
);

str_enum!(
    #[serde(rename_all = "snake_case")]
    AuditAction {
        Created => "created",
        AutoResolved => "auto_resolved",
        FlaggedForReview => "flagged_for_review",
        ReviewResolved => "review_resolved",
        UserEdited => "user_edited",
        DuplicateBlocked => "duplicate_blocked",
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_round_trips_through_str() {
        for s in ["applied", "interview", "declined", "offer"] {
            assert_eq!(JobStatus::from_str(s).unwrap().as_str(), s);
        }
        assert_eq!(
            ResolutionStrategy::from_str("prefer-manual").unwrap(),
            ResolutionStrategy::PreferManual
        );
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = RecordSource::from_str("robot").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn status_ranks_follow_progression() {
        assert!(JobStatus::Applied.rank() < JobStatus::Interview.rank());
        assert!(JobStatus::Interview.rank() < JobStatus::Offer.rank());
        assert_eq!(JobStatus::Declined.rank(), JobStatus::Offer.rank());
        assert!(JobStatus::Declined.is_terminal());
        assert!(!JobStatus::Interview.is_terminal());
    }

    #[test]
    fn user_edit_upgrades_auto_inferred() {
        assert_eq!(RecordSource::AutoInferred.after_user_edit(), RecordSource::ManualEdited);
        assert_eq!(RecordSource::Hybrid.after_user_edit(), RecordSource::Hybrid);
    }

    #[test]
    fn merge_mixing_provenance_becomes_hybrid() {
        assert_eq!(
            RecordSource::ManualCreated.merged_with(RecordSource::AutoInferred),
            RecordSource::Hybrid
        );
        assert_eq!(
            RecordSource::AutoInferred.merged_with(RecordSource::ManualEdited),
            RecordSource::Hybrid
        );
        assert_eq!(
            RecordSource::AutoInferred.merged_with(RecordSource::AutoInferred),
            RecordSource::AutoInferred
        );
    }

    #[test]
    fn merge_never_downgrades() {
        assert_eq!(
            RecordSource::Hybrid.merged_with(RecordSource::ManualCreated),
            RecordSource::Hybrid
        );
        assert_eq!(
            RecordSource::ManualEdited.merged_with(RecordSource::ManualCreated),
            RecordSource::ManualEdited
        );
    }

    #[test]
    fn duplicate_risk_serializes_upper_case() {
        let json = serde_json::to_string(&DuplicateRisk::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
