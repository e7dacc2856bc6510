//! Workshop audience groups and the static group -> CRC class-name table.
//!
//! Groups are the admin-facing audience selectors; CRC classes are the
//! externally-owned records workshops actually link to. The mapping is
//! fixed in code so an unknown group is rejected at parse time instead of
//! surfacing as a silent empty lookup.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkshopGroup {
    EntryYear,
    Senior4,
    Senior5GroupA,
    Senior5GroupB,
    Senior5,
    Senior6GroupA,
    Senior6GroupB,
    Senior6GroupC,
    Senior6,
}

impl WorkshopGroup {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "entry_year" => Some(Self::EntryYear),
            "senior_4" => Some(Self::Senior4),
            "senior_5_group_a" => Some(Self::Senior5GroupA),
            "senior_5_group_b" => Some(Self::Senior5GroupB),
            "senior_5" => Some(Self::Senior5),
            "senior_6_group_a" => Some(Self::Senior6GroupA),
            "senior_6_group_b" => Some(Self::Senior6GroupB),
            "senior_6_group_c" => Some(Self::Senior6GroupC),
            "senior_6" => Some(Self::Senior6),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntryYear => "entry_year",
            Self::Senior4 => "senior_4",
            Self::Senior5GroupA => "senior_5_group_a",
            Self::Senior5GroupB => "senior_5_group_b",
            Self::Senior5 => "senior_5",
            Self::Senior6GroupA => "senior_6_group_a",
            Self::Senior6GroupB => "senior_6_group_b",
            Self::Senior6GroupC => "senior_6_group_c",
            Self::Senior6 => "senior_6",
        }
    }

    /// CRC class names this group resolves to. Never empty.
    pub fn class_names(&self) -> &'static [&'static str] {
        match self {
            Self::EntryYear => &["Entry Year"],
            Self::Senior4 => &["S4"],
            Self::Senior5GroupA => &["S5 Group A"],
            Self::Senior5GroupB => &["S5 Group B"],
            Self::Senior5 => &["S5 Group A", "S5 Group B"],
            Self::Senior6GroupA => &["S6 Group A"],
            Self::Senior6GroupB => &["S6 Group B"],
            Self::Senior6GroupC => &["S6 Group C"],
            Self::Senior6 => &["S6 Group A", "S6 Group B", "S6 Group C"],
        }
    }

    pub fn all() -> &'static [WorkshopGroup] {
        &[
            Self::EntryYear,
            Self::Senior4,
            Self::Senior5GroupA,
            Self::Senior5GroupB,
            Self::Senior5,
            Self::Senior6GroupA,
            Self::Senior6GroupB,
            Self::Senior6GroupC,
            Self::Senior6,
        ]
    }
}

/// Distinct class names across all groups, for syncing the built-in roster.
pub fn roster_class_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for g in WorkshopGroup::all() {
        for &name in g.class_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}
