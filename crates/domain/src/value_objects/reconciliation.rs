use serde::Serialize;

/// Query keys the signing provider may append when redirecting back.
pub const RETURN_MARKER_KEYS: [&str; 5] = [
    "event",
    "source",
    "eventType",
    "client_user_id",
    "clientUserId",
];

/// Marker parameters seen on a redirect back from the signing provider.
/// Only their presence matters, values are kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnMarkers {
    pub markers: Vec<(String, String)>,
}

impl ReturnMarkers {
    pub fn from_query<'a, I>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let markers: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(key, _)| RETURN_MARKER_KEYS.iter().any(|marker| marker == key))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if markers.is_empty() {
            None
        } else {
            Some(Self { markers })
        }
    }

    pub fn event(&self) -> Option<&str> {
        self.markers
            .iter()
            .find(|(key, _)| key == "event" || key == "eventType")
            .map(|(_, value)| value.as_str())
    }
}

/// Why a reconciliation pass was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum ReconcileTrigger {
    Mount,
    RedirectReturn(ReturnMarkers),
    EnvelopeAppeared,
    ManualRefresh,
}

impl ReconcileTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileTrigger::Mount => "mount",
            ReconcileTrigger::RedirectReturn(_) => "redirect_return",
            ReconcileTrigger::EnvelopeAppeared => "envelope_appeared",
            ReconcileTrigger::ManualRefresh => "manual_refresh",
        }
    }
}
