//! Consumption cursor and recency markers.

/// Recency marker attached to a raw item.
///
/// `Seq` carries unix seconds or another monotone integer. `Text` carries a
/// pre-formatted timestamp or continuation token and orders lexicographically,
/// the same comparison the upstream APIs apply to these values; a fixed-width,
/// fixed-timezone format is assumed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Marker {
    Seq(u64),
    Text(String),
}

/// How far one source has been consumed.
///
/// Replaced wholesale on every advance; owned by exactly one poll loop and
/// never shared across sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    position: Option<Marker>,
}

impl Cursor {
    /// Cursor that admits everything the source returns.
    pub fn start() -> Self {
        Self { position: None }
    }

    /// Cursor positioned at a concrete marker.
    pub fn at(marker: Marker) -> Self {
        Self {
            position: Some(marker),
        }
    }

    /// Cursor positioned at the current wall clock, in unix seconds.
    pub fn now() -> Self {
        Self::at(Marker::Seq(chrono::Utc::now().timestamp().max(0) as u64))
    }

    pub fn position(&self) -> Option<&Marker> {
        self.position.as_ref()
    }

    /// Whether an item bearing `marker` is new relative to this cursor.
    ///
    /// Items without a marker are always admitted; the dedup window is their
    /// only suppressor.
    pub fn admits(&self, marker: Option<&Marker>) -> bool {
        match (&self.position, marker) {
            (Some(position), Some(marker)) => marker > position,
            _ => true,
        }
    }

    /// Next cursor after an iteration: the maximum of the current position,
    /// the fetcher's candidate and the markers of delivered items. Never
    /// moves backwards.
    pub fn advanced(
        &self,
        candidate: Option<Marker>,
        delivered: impl IntoIterator<Item = Marker>,
    ) -> Cursor {
        let mut next = self.position.clone();
        for marker in candidate.into_iter().chain(delivered) {
            if next.as_ref().map_or(true, |current| marker > *current) {
                next = Some(marker);
            }
        }
        Cursor { position: next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_admits_everything() {
        let cursor = Cursor::start();
        assert!(cursor.admits(Some(&Marker::Seq(0))));
        assert!(cursor.admits(None));
    }

    #[test]
    fn admits_is_strict() {
        let cursor = Cursor::at(Marker::Seq(10));
        assert!(!cursor.admits(Some(&Marker::Seq(9))));
        assert!(!cursor.admits(Some(&Marker::Seq(10))));
        assert!(cursor.admits(Some(&Marker::Seq(11))));
        // no marker: always new, dedup takes over
        assert!(cursor.admits(None));
    }

    #[test]
    fn text_markers_compare_lexicographically() {
        let cursor = Cursor::at(Marker::Text("2024-01-02 00:00:00".into()));
        assert!(cursor.admits(Some(&Marker::Text("2024-01-02 00:00:01".into()))));
        assert!(!cursor.admits(Some(&Marker::Text("2024-01-01 23:59:59".into()))));
    }

    #[test]
    fn advanced_never_moves_backwards() {
        let cursor = Cursor::at(Marker::Seq(10));
        let next = cursor.advanced(Some(Marker::Seq(3)), [Marker::Seq(7)]);
        assert_eq!(next.position(), Some(&Marker::Seq(10)));
    }

    #[test]
    fn advanced_takes_the_maximum() {
        let cursor = Cursor::at(Marker::Seq(10));
        let next = cursor.advanced(Some(Marker::Seq(12)), [Marker::Seq(15), Marker::Seq(11)]);
        assert_eq!(next.position(), Some(&Marker::Seq(15)));
    }

    #[test]
    fn advanced_with_nothing_is_unchanged() {
        let cursor = Cursor::at(Marker::Seq(10));
        assert_eq!(cursor.advanced(None, []), cursor);
    }
}
