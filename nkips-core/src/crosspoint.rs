//! Composed view of one destination.

use crate::labels::{LabelStore, PortKind};
use crate::matrix::RoutingMatrix;
use nkips_protocol::Level;
use serde::Serialize;

/// Source routed to a destination on one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelSource {
    pub level: Level,
    /// Routed source, `None` while the router has not reported one.
    pub id: Option<u16>,
    pub label: String,
    pub description: String,
}

/// A destination with its label and the source routed on every level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossPointState {
    pub id: u16,
    pub label: String,
    pub description: String,
    pub sources: Vec<LevelSource>,
}

impl CrossPointState {
    /// Builds the view of `destination` from the current matrix and labels.
    pub fn compose(matrix: &RoutingMatrix, labels: &LabelStore, destination: u16) -> Self {
        let output = labels.get(PortKind::Output, destination);

        let sources = matrix
            .levels()
            .iter()
            .map(|&level| {
                let id = matrix.get(level, destination);
                let input = id
                    .map(|source| labels.get(PortKind::Input, source))
                    .unwrap_or_default();
                LevelSource {
                    level,
                    id,
                    label: input.label,
                    description: input.description,
                }
            })
            .collect();

        Self {
            id: destination,
            label: output.label,
            description: output.description,
            sources,
        }
    }

    /// Source routed on `level`, if any.
    pub fn source(&self, level: Level) -> Option<u16> {
        self.sources
            .iter()
            .find(|s| s.level == level)
            .and_then(|s| s.id)
    }

    /// Entry of `level`, if the level is configured.
    pub fn level(&self, level: Level) -> Option<&LevelSource> {
        self.sources.iter().find(|s| s.level == level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelUpdate;

    fn labels() -> LabelStore {
        LabelStore::parse("1,PGM,Program out,CAM 1,Camera one,,\n2,PVW,,CAM 2,,,").unwrap()
    }

    #[test]
    fn test_compose_routed_and_unset_levels() {
        let mut matrix = RoutingMatrix::new(4, 4, 2);
        matrix.set(Level::MdVideo, 1, 2).unwrap();

        let state = CrossPointState::compose(&matrix, &labels(), 1);
        assert_eq!(state.id, 1);
        assert_eq!(state.label, "PGM");
        assert_eq!(state.description, "Program out");
        assert_eq!(state.sources.len(), 2);

        let video = state.level(Level::MdVideo).unwrap();
        assert_eq!(video.id, Some(2));
        assert_eq!(video.label, "CAM 2");

        let sdi = state.level(Level::SdiVideo).unwrap();
        assert_eq!(sdi.id, None);
        assert!(sdi.label.is_empty());

        assert!(state.level(Level::AesAudio1).is_none());
        assert_eq!(state.source(Level::MdVideo), Some(2));
    }

    #[test]
    fn test_compose_reflects_label_updates() {
        let mut matrix = RoutingMatrix::new(4, 4, 1);
        matrix.set(Level::MdVideo, 2, 1).unwrap();
        let mut labels = labels();
        labels
            .set(PortKind::Input, 1, LabelUpdate::label("JIB"))
            .unwrap();

        let state = CrossPointState::compose(&matrix, &labels, 2);
        assert_eq!(state.sources[0].label, "JIB");
        assert_eq!(state.sources[0].description, "Camera one");
    }

    #[test]
    fn test_serialize() {
        let matrix = RoutingMatrix::new(4, 4, 1);
        let state = CrossPointState::compose(&matrix, &LabelStore::new(), 3);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["sources"][0]["level"], "md_video");
        assert!(json["sources"][0]["id"].is_null());
    }
}
