//! Stable cursor colors for remote clients.
//!
//! A client keeps the same color for its whole session and on every
//! peer: the color is a pure function of the numeric client id.

/// Foreground (caret, label text) and background (label, selection) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorColor {
    pub foreground: &'static str,
    pub background: &'static str,
}

impl CursorColor {
    const fn new(foreground: &'static str, background: &'static str) -> Self {
        Self { foreground, background }
    }

    /// The background as a CSS `rgba()` with the given opacity.
    pub fn background_with_alpha(&self, alpha: f32) -> String {
        let (r, g, b) = parse_hex(self.background);
        format!("rgba({r}, {g}, {b}, {alpha})")
    }
}

/// Ordered palette; index with [`color_for_client`].
pub const PALETTE: [CursorColor; 12] = [
    CursorColor::new("#ffffff", "#e8590c"),
    CursorColor::new("#ffffff", "#1971c2"),
    CursorColor::new("#ffffff", "#2f9e44"),
    CursorColor::new("#ffffff", "#9c36b5"),
    CursorColor::new("#212529", "#fab005"),
    CursorColor::new("#ffffff", "#c2255c"),
    CursorColor::new("#ffffff", "#0c8599"),
    CursorColor::new("#212529", "#94d82d"),
    CursorColor::new("#ffffff", "#5f3dc4"),
    CursorColor::new("#ffffff", "#e03131"),
    CursorColor::new("#212529", "#66d9e8"),
    CursorColor::new("#ffffff", "#495057"),
];

pub fn color_for_client(client_id: u64) -> CursorColor {
    PALETTE[(client_id % PALETTE.len() as u64) as usize]
}

fn parse_hex(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    (channel(0), channel(2), channel(4))
}
