use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::{CommandRecord, CommandStatus};

/// Receiver for device-write audit records. Storage is the sink's business.
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    fn record(&self, record: CommandRecord);
}

/// Emits every record as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: CommandRecord) {
        let details = record.details.to_string();
        match record.status {
            CommandStatus::Success => info!(
                target: "audit",
                zone_id = record.zone_id,
                command = %record.command_type,
                status = %record.status,
                target_temp = record.target_temp,
                %details,
                "device command"
            ),
            CommandStatus::Failed | CommandStatus::Error => warn!(
                target: "audit",
                zone_id = record.zone_id,
                command = %record.command_type,
                status = %record.status,
                target_temp = record.target_temp,
                %details,
                "device command"
            ),
        }
    }
}

/// Keeps records in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<CommandRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.lock().clone()
    }

    pub fn for_zone(&self, zone_id: u32) -> Vec<CommandRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.zone_id == zone_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: CommandRecord) {
        self.records.lock().push(record);
    }
}
