use super::TlbMaintenance;
use aarch64::mem::{AddrRange, IpAddr, PAddr, VAddr};
use ksync::SpinLock;

const LOG_CAPACITY: usize = 64;

/// A maintenance operation observed by [`RecordingTlb`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TlbEvent {
    Stage1(AddrRange<VAddr>),
    Stage2 { vmid: u16, range: AddrRange<IpAddr> },
    SetAddressSpace { vmid: u16, root: PAddr },
}

#[derive(Debug)]
struct EventLog {
    events: [Option<TlbEvent>; LOG_CAPACITY],
    /// How many events were recorded in total, older ones get overwritten once the log is full
    recorded: usize,
}

/// A [`TlbMaintenance`] implementation that has no hardware effect and remembers the most recent requests instead.
///
/// It is used when the hypervisor core runs hosted, e.g. in tests.
#[derive(Debug)]
pub struct RecordingTlb {
    log: SpinLock<EventLog>,
}

impl RecordingTlb {
    pub const fn new() -> Self {
        Self {
            log: SpinLock::new(EventLog {
                events: [None; LOG_CAPACITY],
                recorded: 0,
            }),
        }
    }

    fn record(&self, event: TlbEvent) {
        let mut log = self.log.spin_lock();
        let slot = log.recorded % LOG_CAPACITY;
        log.events[slot] = Some(event);
        log.recorded += 1;
    }

    /// How many events were recorded since the last [`clear()`](RecordingTlb::clear).
    pub fn recorded(&self) -> usize {
        self.log.spin_lock().recorded
    }

    /// The most recently recorded event.
    pub fn last(&self) -> Option<TlbEvent> {
        let log = self.log.spin_lock();
        match log.recorded {
            0 => None,
            n => log.events[(n - 1) % LOG_CAPACITY],
        }
    }

    /// Whether `event` is among the retained events.
    pub fn contains(&self, event: &TlbEvent) -> bool {
        self.log.spin_lock().events.iter().flatten().any(|e| e == event)
    }

    pub fn clear(&self) {
        let mut log = self.log.spin_lock();
        log.events = [None; LOG_CAPACITY];
        log.recorded = 0;
    }
}

impl Default for RecordingTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl TlbMaintenance for RecordingTlb {
    fn invalidate_stage1(&self, range: AddrRange<VAddr>) {
        log::trace!("recording stage 1 invalidation of {range:?}");
        self.record(TlbEvent::Stage1(range));
    }

    fn invalidate_stage2(&self, vmid: u16, range: AddrRange<IpAddr>) {
        log::trace!("recording stage 2 invalidation of {range:?} for vm {vmid}");
        self.record(TlbEvent::Stage2 { vmid, range });
    }

    fn set_address_space(&self, vmid: u16, root: PAddr) {
        self.record(TlbEvent::SetAddressSpace { vmid, root });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_wraps_around() {
        let tlb = RecordingTlb::new();
        for i in 0..(LOG_CAPACITY as u64 + 3) {
            tlb.invalidate_stage1(AddrRange::from_len(VAddr::new(i * 0x1000), 0x1000));
        }
        assert_eq!(tlb.recorded(), LOG_CAPACITY + 3);
        assert_eq!(
            tlb.last(),
            Some(TlbEvent::Stage1(AddrRange::from_len(
                VAddr::new((LOG_CAPACITY as u64 + 2) * 0x1000),
                0x1000
            )))
        );
        assert!(!tlb.contains(&TlbEvent::Stage1(AddrRange::from_len(VAddr::new(0), 0x1000))));

        tlb.clear();
        assert_eq!(tlb.last(), None);
    }
}
