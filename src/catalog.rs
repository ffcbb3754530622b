//! The fixed slot catalog: six two-hour windows per day, identical for
//! every coach. Configuration data, not computed.

/// One bookable window. Times are minutes from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDef {
    pub label: &'static str,
    pub start_minute: u16,
    pub end_minute: u16,
}

impl SlotDef {
    pub fn duration_minutes(&self) -> u32 {
        (self.end_minute - self.start_minute) as u32
    }
}

/// Ordered by start time. The label is the wire identity of a slot.
pub const SLOTS: [SlotDef; 6] = [
    SlotDef { label: "9:00 AM - 11:00 AM", start_minute: 540, end_minute: 660 },
    SlotDef { label: "11:00 AM - 1:00 PM", start_minute: 660, end_minute: 780 },
    SlotDef { label: "1:00 PM - 3:00 PM", start_minute: 780, end_minute: 900 },
    SlotDef { label: "3:00 PM - 5:00 PM", start_minute: 900, end_minute: 1020 },
    SlotDef { label: "5:00 PM - 7:00 PM", start_minute: 1020, end_minute: 1140 },
    SlotDef { label: "7:00 PM - 9:00 PM", start_minute: 1140, end_minute: 1260 },
];

pub fn by_label(label: &str) -> Option<&'static SlotDef> {
    SLOTS.iter().find(|s| s.label == label)
}

/// Position in catalog order; used to sort slot lists for display.
pub fn position(label: &str) -> Option<usize> {
    SLOTS.iter().position(|s| s.label == label)
}
