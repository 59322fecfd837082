//! In-memory routing matrix.
//!
//! One row per configured level, one slot per destination. Ids are 1-based
//! at this API and 0-based in storage; nothing outside this module indexes
//! the rows directly.

use crate::error::CoreError;
use nkips_protocol::Level;

/// Source assigned to every (level, destination) pair.
#[derive(Debug, Clone)]
pub struct RoutingMatrix {
    inputs: u16,
    outputs: u16,
    levels: Vec<Level>,
    rows: Vec<Vec<Option<u16>>>,
}

impl RoutingMatrix {
    /// Creates an empty matrix tracking the first `level_count` levels.
    pub fn new(inputs: u16, outputs: u16, level_count: usize) -> Self {
        let levels = Level::first(level_count).to_vec();
        let rows = levels
            .iter()
            .map(|_| vec![None; outputs as usize])
            .collect();

        Self {
            inputs,
            outputs,
            levels,
            rows,
        }
    }

    pub fn inputs(&self) -> u16 {
        self.inputs
    }

    pub fn outputs(&self) -> u16 {
        self.outputs
    }

    /// Configured levels, in list order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn has_level(&self, level: Level) -> bool {
        level.index() < self.rows.len()
    }

    /// Returns the source routed to `destination` on `level`.
    ///
    /// Unset slots, unconfigured levels and out-of-range destinations all
    /// read as `None`.
    pub fn get(&self, level: Level, destination: u16) -> Option<u16> {
        let slot = (destination as usize).checked_sub(1)?;
        *self.rows.get(level.index())?.get(slot)?
    }

    /// Routes `source` to `destination` on `level`, returning the previous
    /// source.
    pub fn set(
        &mut self,
        level: Level,
        destination: u16,
        source: u16,
    ) -> Result<Option<u16>, CoreError> {
        self.check_source(source)?;
        let slot = self.slot_mut(level, destination)?;
        Ok(slot.replace(source))
    }

    /// Checks that `set` would accept the assignment, without writing it.
    pub fn validate(&self, level: Level, destination: u16, source: u16) -> Result<(), CoreError> {
        if !self.has_level(level) {
            return Err(CoreError::LevelNotConfigured { level });
        }
        if destination == 0 || destination > self.outputs {
            return Err(CoreError::DestinationOutOfRange {
                destination,
                outputs: self.outputs,
            });
        }
        self.check_source(source)
    }

    /// Clears the slot of `destination` on `level`.
    pub fn unset(&mut self, level: Level, destination: u16) -> Result<Option<u16>, CoreError> {
        Ok(self.slot_mut(level, destination)?.take())
    }

    /// Writes a batch of `(destination, source)` entries on `level` and
    /// returns how many were applied. Out-of-range entries are skipped.
    pub fn apply_table<I>(&mut self, level: Level, entries: I) -> Result<usize, CoreError>
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        if !self.has_level(level) {
            return Err(CoreError::LevelNotConfigured { level });
        }

        let mut applied = 0;
        let mut skipped = 0;
        for (destination, source) in entries {
            match self.set(level, destination, source) {
                Ok(_) => applied += 1,
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!(
                "table for {} had {} out-of-range entries ({} applied)",
                level,
                skipped,
                applied
            );
        }

        Ok(applied)
    }

    /// Number of set slots on `level`.
    pub fn routed(&self, level: Level) -> usize {
        self.rows
            .get(level.index())
            .map(|row| row.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }

    /// Unsets every slot.
    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.iter_mut().for_each(|slot| *slot = None);
        }
    }

    fn check_source(&self, source: u16) -> Result<(), CoreError> {
        if source == 0 || source > self.inputs {
            return Err(CoreError::SourceOutOfRange {
                id: source,
                inputs: self.inputs,
            });
        }
        Ok(())
    }

    fn slot_mut(&mut self, level: Level, destination: u16) -> Result<&mut Option<u16>, CoreError> {
        let outputs = self.outputs;
        let row = self
            .rows
            .get_mut(level.index())
            .ok_or(CoreError::LevelNotConfigured { level })?;

        (destination as usize)
            .checked_sub(1)
            .and_then(|slot| row.get_mut(slot))
            .ok_or(CoreError::DestinationOutOfRange {
                destination,
                outputs,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_then_get() {
        let mut matrix = RoutingMatrix::new(255, 255, 8);
        assert_eq!(matrix.set(Level::SdiVideo, 6, 4).unwrap(), None);
        assert_eq!(matrix.get(Level::SdiVideo, 6), Some(4));
        assert_eq!(matrix.set(Level::SdiVideo, 6, 9).unwrap(), Some(4));
        assert_eq!(matrix.get(Level::SdiVideo, 6), Some(9));

        // Other levels and destinations are untouched.
        assert_eq!(matrix.get(Level::MdVideo, 6), None);
        assert_eq!(matrix.get(Level::SdiVideo, 5), None);
    }

    #[test]
    fn test_get_out_of_range_is_none() {
        let matrix = RoutingMatrix::new(16, 16, 2);
        assert_eq!(matrix.get(Level::MdVideo, 0), None);
        assert_eq!(matrix.get(Level::MdVideo, 17), None);
        assert_eq!(matrix.get(Level::AesAudio1, 1), None);
    }

    #[test]
    fn test_set_bounds() {
        let mut matrix = RoutingMatrix::new(16, 32, 2);
        assert!(matches!(
            matrix.set(Level::MdVideo, 0, 1),
            Err(CoreError::DestinationOutOfRange { destination: 0, .. })
        ));
        assert!(matches!(
            matrix.set(Level::MdVideo, 33, 1),
            Err(CoreError::DestinationOutOfRange { outputs: 32, .. })
        ));
        assert!(matches!(
            matrix.set(Level::MdVideo, 1, 17),
            Err(CoreError::SourceOutOfRange { id: 17, inputs: 16 })
        ));
        assert!(matches!(
            matrix.set(Level::MdVideo, 1, 0),
            Err(CoreError::SourceOutOfRange { id: 0, .. })
        ));
        assert!(matches!(
            matrix.set(Level::AesAudio1, 1, 1),
            Err(CoreError::LevelNotConfigured {
                level: Level::AesAudio1
            })
        ));
        assert!(matrix.set(Level::SdiVideo, 32, 16).is_ok());
    }

    #[test]
    fn test_validate_matches_set() {
        let mut matrix = RoutingMatrix::new(16, 32, 2);
        for (level, destination, source) in [
            (Level::MdVideo, 0, 1),
            (Level::MdVideo, 33, 1),
            (Level::MdVideo, 1, 17),
            (Level::AesAudio1, 1, 1),
            (Level::SdiVideo, 32, 16),
        ] {
            let checked = matrix.validate(level, destination, source).is_ok();
            assert_eq!(checked, matrix.set(level, destination, source).is_ok());
        }
        assert_eq!(matrix.routed(Level::SdiVideo), 1);
    }

    #[test]
    fn test_apply_table_skips_out_of_range() {
        let mut matrix = RoutingMatrix::new(10, 4, 1);
        let applied = matrix
            .apply_table(Level::MdVideo, vec![(1, 2), (2, 11), (3, 10), (5, 1)])
            .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(matrix.get(Level::MdVideo, 1), Some(2));
        assert_eq!(matrix.get(Level::MdVideo, 2), None);
        assert_eq!(matrix.get(Level::MdVideo, 3), Some(10));
        assert_eq!(matrix.routed(Level::MdVideo), 2);

        assert!(matrix.apply_table(Level::SdiVideo, vec![(1, 1)]).is_err());
    }

    #[test]
    fn test_unset_and_clear() {
        let mut matrix = RoutingMatrix::new(8, 8, 8);
        matrix.set(Level::MachineControl, 8, 8).unwrap();
        matrix.set(Level::MdVideo, 1, 1).unwrap();

        assert_eq!(matrix.unset(Level::MachineControl, 8).unwrap(), Some(8));
        assert_eq!(matrix.get(Level::MachineControl, 8), None);

        matrix.clear();
        assert_eq!(matrix.routed(Level::MdVideo), 0);
    }

    #[test]
    fn test_levels_follow_configured_count() {
        let matrix = RoutingMatrix::new(1, 1, 3);
        assert_eq!(
            matrix.levels(),
            &[Level::MdVideo, Level::SdiVideo, Level::AesAudio1]
        );
        assert!(matrix.has_level(Level::AesAudio1));
        assert!(!matrix.has_level(Level::AesAudio2));

        assert_eq!(RoutingMatrix::new(1, 1, 12).levels().len(), 8);
    }

    proptest! {
        #[test]
        fn test_set_get_agree(
            level in 0usize..8,
            destination in 1u16..=255,
            source in 1u16..=255,
        ) {
            let level = Level::from_index(level).unwrap();
            let mut matrix = RoutingMatrix::new(255, 255, 8);
            matrix.set(level, destination, source).unwrap();
            prop_assert_eq!(matrix.get(level, destination), Some(source));
            prop_assert_eq!(matrix.routed(level), 1);
        }
    }
}
