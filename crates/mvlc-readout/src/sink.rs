use std::collections::BTreeMap;

use serde::Serialize;

use mvlc_frame::StackErrorInfo;

use crate::counters::AnomalyKind;

/// The three segments of one module's contribution to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Prefix,
    Dynamic,
    Suffix,
}

impl PartKind {
    pub const ALL: [PartKind; 3] = [PartKind::Prefix, PartKind::Dynamic, PartKind::Suffix];
}

/// Receives the parser's output.
///
/// Callbacks run synchronously from within
/// [`ReadoutParser::parse_buffer`](crate::ReadoutParser::parse_buffer).
/// Data slices are only valid for the duration of the call. An event's
/// callbacks are delivered once the event is complete, so a discarded event
/// produces no callbacks at all, only an [`anomaly`](ReadoutSink::anomaly).
pub trait ReadoutSink {
    fn begin_event(&mut self, _event_index: usize) {}

    fn module_part(
        &mut self,
        _event_index: usize,
        _module_index: usize,
        _kind: PartKind,
        _data: &[u32],
    ) {
    }

    fn end_event(&mut self, _event_index: usize) {}

    fn system_event(&mut self, _subtype: u8, _data: &[u32]) {}

    /// A stack error notification found between readout frames.
    fn stack_error(&mut self, _info: &StackErrorInfo) {}

    fn anomaly(&mut self, _kind: AnomalyKind) {}
}

impl<S: ReadoutSink + ?Sized> ReadoutSink for &mut S {
    fn begin_event(&mut self, event_index: usize) {
        (**self).begin_event(event_index)
    }

    fn module_part(&mut self, event_index: usize, module_index: usize, kind: PartKind, data: &[u32]) {
        (**self).module_part(event_index, module_index, kind, data)
    }

    fn end_event(&mut self, event_index: usize) {
        (**self).end_event(event_index)
    }

    fn system_event(&mut self, subtype: u8, data: &[u32]) {
        (**self).system_event(subtype, data)
    }

    fn stack_error(&mut self, info: &StackErrorInfo) {
        (**self).stack_error(info)
    }

    fn anomaly(&mut self, kind: AnomalyKind) {
        (**self).anomaly(kind)
    }
}

/// Owned copy of one parser callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserEvent {
    BeginEvent {
        event_index: usize,
    },
    ModulePart {
        event_index: usize,
        module_index: usize,
        kind: PartKind,
        data: Vec<u32>,
    },
    EndEvent {
        event_index: usize,
    },
    SystemEvent {
        subtype: u8,
        data: Vec<u32>,
    },
}

/// Records every callback in order. Handy for tests and inspection tools.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    pub events: Vec<ParserEvent>,
    pub anomalies: Vec<AnomalyKind>,
    pub stack_errors: Vec<StackErrorInfo>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.anomalies.clear();
        self.stack_errors.clear();
    }
}

impl ReadoutSink for EventRecorder {
    fn begin_event(&mut self, event_index: usize) {
        self.events.push(ParserEvent::BeginEvent { event_index });
    }

    fn module_part(&mut self, event_index: usize, module_index: usize, kind: PartKind, data: &[u32]) {
        self.events.push(ParserEvent::ModulePart {
            event_index,
            module_index,
            kind,
            data: data.to_vec(),
        });
    }

    fn end_event(&mut self, event_index: usize) {
        self.events.push(ParserEvent::EndEvent { event_index });
    }

    fn system_event(&mut self, subtype: u8, data: &[u32]) {
        self.events.push(ParserEvent::SystemEvent {
            subtype,
            data: data.to_vec(),
        });
    }

    fn stack_error(&mut self, info: &StackErrorInfo) {
        self.stack_errors.push(*info);
    }

    fn anomaly(&mut self, kind: AnomalyKind) {
        self.anomalies.push(kind);
    }
}

/// Size statistics for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStats {
    pub hits: u64,
    pub words: u64,
    pub max_dynamic_words: usize,
}

/// Hit and size statistics for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub hits: u64,
    pub modules: Vec<ModuleStats>,
}

/// Counts events and module data without keeping the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventCounter {
    pub events: Vec<EventStats>,
    pub system_events: BTreeMap<u8, u64>,
    #[serde(skip)]
    current_module: Option<usize>,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_events(&self) -> u64 {
        self.events.iter().map(|e| e.hits).sum()
    }

    fn event_mut(&mut self, event_index: usize) -> &mut EventStats {
        if self.events.len() <= event_index {
            self.events.resize_with(event_index + 1, EventStats::default);
        }
        &mut self.events[event_index]
    }
}

impl ReadoutSink for EventCounter {
    fn begin_event(&mut self, event_index: usize) {
        self.current_module = None;
        self.event_mut(event_index).hits += 1;
    }

    fn module_part(&mut self, event_index: usize, module_index: usize, kind: PartKind, data: &[u32]) {
        // Parts of one module arrive back to back.
        let new_module = self.current_module != Some(module_index);
        self.current_module = Some(module_index);

        let event = self.event_mut(event_index);
        if event.modules.len() <= module_index {
            event.modules.resize(module_index + 1, ModuleStats::default());
        }
        let module = &mut event.modules[module_index];
        if new_module {
            module.hits += 1;
        }
        module.words += data.len() as u64;
        if kind == PartKind::Dynamic {
            module.max_dynamic_words = module.max_dynamic_words.max(data.len());
        }
    }

    fn system_event(&mut self, subtype: u8, _data: &[u32]) {
        *self.system_events.entry(subtype).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_keeps_order() {
        let mut recorder = EventRecorder::new();
        {
            let sink: &mut dyn ReadoutSink = &mut recorder;
            sink.begin_event(0);
            sink.module_part(0, 0, PartKind::Prefix, &[1, 2]);
            sink.end_event(0);
            sink.anomaly(AnomalyKind::FrameTruncated);
        }
        assert_eq!(
            recorder.events,
            vec![
                ParserEvent::BeginEvent { event_index: 0 },
                ParserEvent::ModulePart {
                    event_index: 0,
                    module_index: 0,
                    kind: PartKind::Prefix,
                    data: vec![1, 2],
                },
                ParserEvent::EndEvent { event_index: 0 },
            ]
        );
        assert_eq!(recorder.anomalies, vec![AnomalyKind::FrameTruncated]);
    }

    #[test]
    fn counter_tracks_sizes() {
        let mut counter = EventCounter::new();
        for size in [3usize, 7] {
            counter.begin_event(1);
            counter.module_part(1, 0, PartKind::Prefix, &[0]);
            counter.module_part(1, 0, PartKind::Dynamic, &vec![0; size]);
            counter.end_event(1);
        }
        counter.system_event(0x11, &[]);

        assert_eq!(counter.total_events(), 2);
        assert_eq!(counter.events[0].hits, 0);
        let module = counter.events[1].modules[0];
        assert_eq!(module.hits, 2);
        assert_eq!(module.words, 12);
        assert_eq!(module.max_dynamic_words, 7);
        assert_eq!(counter.system_events[&0x11], 1);
    }
}
