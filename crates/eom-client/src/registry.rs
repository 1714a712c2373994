//! Local cache of known outputs
//!
//! Records are kept in insertion order and looked up linearly; a device has
//! a handful of outputs at most. The registry is only touched with the
//! client state lock held.

use crate::types::{
    AttributeState, ConnectorType, OutputAttribute, OutputId, OutputMode, OutputRecord,
    PhysicalSize, Resolution,
};

/// Outcome of applying an attribute change to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUpdate {
    Applied,
    /// The change concerns another process's attribute; ignored
    ForeignProcess,
    UnknownOutput,
}

/// Snapshot of an output as reported by discovery or an `Added` push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub connector_type: ConnectorType,
    pub mode: OutputMode,
    pub resolution: Resolution,
    pub physical_size: PhysicalSize,
}

#[derive(Debug, Default)]
pub struct OutputRegistry {
    records: Vec<OutputRecord>,
}

impl OutputRegistry {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: OutputId) -> Option<&OutputRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    fn find_mut(&mut self, id: OutputId) -> Option<&mut OutputRecord> {
        self.records.iter_mut().find(|record| record.id == id)
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.find(id).is_some()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<OutputId> {
        self.records.iter().map(|record| record.id).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn find_or_insert(&mut self, id: OutputId, connector_type: ConnectorType) -> (&mut OutputRecord, bool) {
        match self.records.iter().position(|record| record.id == id) {
            Some(index) => (&mut self.records[index], false),
            None => {
                self.records.push(OutputRecord::new(id, connector_type));
                let last = self.records.len() - 1;
                (&mut self.records[last], true)
            }
        }
    }

    /// Record an output learned through `GetOutputInfo`
    ///
    /// Only creates records. An existing record already carries state that
    /// notifications may have advanced past what discovery reports, so it is
    /// left untouched. Returns whether a record was created.
    pub fn upsert_from_discovery(
        &mut self,
        id: OutputId,
        snapshot: OutputSnapshot,
        attribute: OutputAttribute,
    ) -> bool {
        if self.contains(id) {
            return false;
        }
        let mut record = OutputRecord::new(id, snapshot.connector_type);
        record.mode = snapshot.mode;
        record.resolution = snapshot.resolution;
        record.physical_size = snapshot.physical_size;
        record.attribute = attribute;
        self.records.push(record);
        true
    }

    /// Apply an `Added` push
    ///
    /// A record that does not exist yet is created, so an output plugged in
    /// after discovery becomes visible. Returns whether it was created.
    pub fn apply_add(&mut self, id: OutputId, snapshot: OutputSnapshot) -> bool {
        let (record, created) = self.find_or_insert(id, snapshot.connector_type);
        record.mode = snapshot.mode;
        record.resolution = snapshot.resolution;
        record.physical_size = snapshot.physical_size;
        created
    }

    /// Apply a `Removed` push
    ///
    /// The record stays in the registry with mode and sizes zeroed, so the
    /// id remains resolvable. The attribute is left alone; only attribute
    /// notifications change it. Returns `false` for an unknown id.
    pub fn apply_remove(&mut self, id: OutputId) -> bool {
        let Some(record) = self.find_mut(id) else {
            return false;
        };
        record.mode = OutputMode::None;
        record.resolution = Resolution::default();
        record.physical_size = PhysicalSize::default();
        true
    }

    /// Apply a `ModeChanged` push; returns the previous mode if the id is known
    pub fn apply_mode_changed(&mut self, id: OutputId, mode: OutputMode) -> Option<OutputMode> {
        let record = self.find_mut(id)?;
        Some(std::mem::replace(&mut record.mode, mode))
    }

    /// Apply an `AttributeChanged` push
    ///
    /// Only changes addressed to `local_pid` touch the record.
    pub fn apply_attribute_changed(
        &mut self,
        id: OutputId,
        pid: i32,
        local_pid: u32,
        attribute: OutputAttribute,
        state: AttributeState,
    ) -> AttributeUpdate {
        let Some(record) = self.find_mut(id) else {
            return AttributeUpdate::UnknownOutput;
        };
        if u32::try_from(pid).ok() != Some(local_pid) {
            return AttributeUpdate::ForeignProcess;
        }
        record.attribute = attribute;
        record.attribute_state = state;
        AttributeUpdate::Applied
    }

    /// Forget the attribute after it was lost
    pub fn reset_attribute(&mut self, id: OutputId) {
        if let Some(record) = self.find_mut(id) {
            record.attribute = OutputAttribute::None;
            record.attribute_state = AttributeState::None;
        }
    }

    /// Remember an attribute the service accepted for this process
    pub fn set_attribute(&mut self, id: OutputId, attribute: OutputAttribute) -> bool {
        match self.find_mut(id) {
            Some(record) => {
                record.attribute = attribute;
                true
            }
            None => false,
        }
    }
}
