use crate::adapter::{ParseOutcome, ParserAdapter};
use crate::config::HarnessSettings;
use crate::input::InputBuffer;
use crate::mode::Mode;
use crate::source::{BufferSource, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    AwaitingInput,
    Dispatching,
    Done,
}

/// Counters for one harness process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub parsed: u64,
    pub rejected: u64,
}

/// Drives the source and a single, statically chosen adapter.
///
/// Persistent mode cycles `Running -> AwaitingInput -> Dispatching ->
/// Running` until `max_iterations` cases have been dispatched. One-shot mode
/// dispatches at most one case. Either way the loop ends in `Done`, and
/// rejected inputs never turn into errors; the only error is a failing
/// transport.
///
/// Panics and signals raised inside the adapter are deliberately not caught.
pub struct IterationLoop<S, A> {
    mode: Mode,
    source: S,
    adapter: A,
    arena: InputBuffer,
    max_iterations: u64,
    state: LoopState,
    summary: RunSummary,
}

impl<S, A> IterationLoop<S, A>
where
    S: BufferSource,
    A: ParserAdapter,
{
    pub fn new(mode: Mode, source: S, adapter: A, settings: &HarnessSettings) -> Self {
        Self {
            mode,
            source,
            adapter,
            arena: InputBuffer::with_capacity(settings.buffer_capacity),
            max_iterations: settings.max_iterations,
            state: LoopState::Running,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn iteration_budget(&self) -> u64 {
        match self.mode {
            Mode::Persistent => self.max_iterations,
            Mode::OneShot => 1,
        }
    }

    /// Performs a single state transition and returns the new state.
    pub fn step(&mut self) -> Result<LoopState, SourceError> {
        self.state = match self.state {
            LoopState::Running => {
                if self.summary.iterations >= self.iteration_budget() {
                    LoopState::Done
                } else {
                    LoopState::AwaitingInput
                }
            }
            LoopState::AwaitingInput => match self.source.acquire(&mut self.arena)? {
                Some(_) => LoopState::Dispatching,
                None => LoopState::Done,
            },
            LoopState::Dispatching => {
                match self.adapter.parse(self.arena.as_bytes()) {
                    ParseOutcome::Parsed => self.summary.parsed += 1,
                    ParseOutcome::Rejected => self.summary.rejected += 1,
                }
                self.arena.clear();
                self.summary.iterations += 1;
                LoopState::Running
            }
            LoopState::Done => LoopState::Done,
        };
        Ok(self.state)
    }

    pub fn run(mut self) -> Result<RunSummary, SourceError> {
        while self.step()? != LoopState::Done {}
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::JsonTreeAdapter;
    use crate::source::OneShotSource;
    use std::collections::VecDeque;
    use std::io::{self, Cursor};

    /// Engine stand-in: hands out queued cases, then reports end-of-input.
    struct ScriptedSource {
        cases: VecDeque<Vec<u8>>,
        calls: usize,
    }

    impl ScriptedSource {
        fn repeating(case: &[u8], times: usize) -> Self {
            Self {
                cases: std::iter::repeat_n(case.to_vec(), times).collect(),
                calls: 0,
            }
        }
    }

    impl BufferSource for ScriptedSource {
        fn acquire<'a>(
            &mut self,
            arena: &'a mut InputBuffer,
        ) -> Result<Option<&'a [u8]>, SourceError> {
            self.calls += 1;
            match self.cases.pop_front() {
                Some(case) => Ok(Some(arena.fill_from_slice(&case))),
                None => Ok(None),
            }
        }
    }

    struct FailingSource;

    impl BufferSource for FailingSource {
        fn acquire<'a>(
            &mut self,
            _arena: &'a mut InputBuffer,
        ) -> Result<Option<&'a [u8]>, SourceError> {
            Err(SourceError::Io(io::Error::other("engine went away")))
        }
    }

    /// Records every input it is given.
    #[derive(Default)]
    struct RecordingAdapter {
        seen: Vec<Vec<u8>>,
    }

    impl ParserAdapter for RecordingAdapter {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn parse(&mut self, input: &[u8]) -> ParseOutcome {
            self.seen.push(input.to_vec());
            if input.first() == Some(&b'{') {
                ParseOutcome::Parsed
            } else {
                ParseOutcome::Rejected
            }
        }
    }

    fn settings(buffer_capacity: usize, max_iterations: u64) -> HarnessSettings {
        HarnessSettings {
            buffer_capacity,
            max_iterations,
            ..HarnessSettings::default()
        }
    }

    #[test]
    fn one_shot_empty_input_goes_straight_to_done() {
        let mut harness = IterationLoop::new(
            Mode::OneShot,
            OneShotSource::new(io::empty()),
            RecordingAdapter::default(),
            &settings(64, 1000),
        );
        assert_eq!(harness.step().unwrap(), LoopState::AwaitingInput);
        assert_eq!(harness.step().unwrap(), LoopState::Done);
        assert!(harness.adapter().seen.is_empty());
        assert_eq!(harness.summary(), RunSummary::default());
    }

    #[test]
    fn one_shot_dispatches_exactly_once() {
        let mut harness = IterationLoop::new(
            Mode::OneShot,
            OneShotSource::new(Cursor::new(b"{}".to_vec())),
            RecordingAdapter::default(),
            &settings(64, 1000),
        );
        let transitions: Vec<LoopState> =
            std::iter::from_fn(|| match harness.step().unwrap() {
                LoopState::Done => None,
                state => Some(state),
            })
            .collect();
        assert_eq!(
            transitions,
            [
                LoopState::AwaitingInput,
                LoopState::Dispatching,
                LoopState::Running
            ]
        );
        assert_eq!(harness.state(), LoopState::Done);
        assert_eq!(harness.adapter().seen, vec![b"{}".to_vec()]);
        assert_eq!(
            harness.summary(),
            RunSummary {
                iterations: 1,
                parsed: 1,
                rejected: 0
            }
        );
    }

    #[test]
    fn persistent_stops_at_iteration_budget() {
        let source = ScriptedSource::repeating(br#"{"k":[1,2,3]}"#, 1500);
        let harness =
            IterationLoop::new(Mode::Persistent, source, JsonTreeAdapter, &settings(64, 1000));
        let summary = harness.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                iterations: 1000,
                parsed: 1000,
                rejected: 0
            }
        );
    }

    #[test]
    fn persistent_never_acquires_past_budget() {
        let mut harness = IterationLoop::new(
            Mode::Persistent,
            ScriptedSource::repeating(b"{}", 10),
            RecordingAdapter::default(),
            &settings(64, 3),
        );
        while harness.step().unwrap() != LoopState::Done {}
        assert_eq!(harness.source.calls, 3);
        assert_eq!(harness.source.cases.len(), 7);
    }

    #[test]
    fn rejections_complete_normally() {
        let source = ScriptedSource::repeating(b"not json at all", 50);
        let harness =
            IterationLoop::new(Mode::Persistent, source, JsonTreeAdapter, &settings(64, 1000));
        let summary = harness.run().unwrap();
        assert_eq!(summary.iterations, 50);
        assert_eq!(summary.rejected, 50);
        assert_eq!(summary.parsed, 0);
    }

    #[test]
    fn persistent_end_of_input_ends_loop() {
        let mut source = ScriptedSource::repeating(b"{}", 2);
        source.cases.push_back(b"x".to_vec());
        let summary = IterationLoop::new(
            Mode::Persistent,
            source,
            RecordingAdapter::default(),
            &settings(64, 1000),
        )
        .run()
        .unwrap();
        assert_eq!(
            summary,
            RunSummary {
                iterations: 3,
                parsed: 2,
                rejected: 1
            }
        );
    }

    #[test]
    fn oversized_input_reaches_adapter_truncated() {
        let input: Vec<u8> = std::iter::once(b'{').chain(std::iter::repeat_n(b'a', 99)).collect();
        let mut harness = IterationLoop::new(
            Mode::OneShot,
            OneShotSource::new(Cursor::new(input.clone())),
            RecordingAdapter::default(),
            &settings(16, 1000),
        );
        while harness.step().unwrap() != LoopState::Done {}
        assert_eq!(harness.adapter().seen, vec![input[..16].to_vec()]);
    }

    #[test]
    fn arena_is_cleared_between_iterations() {
        let mut source = ScriptedSource::repeating(b"{\"long\":true}", 1);
        source.cases.push_back(b"{}".to_vec());
        let mut harness = IterationLoop::new(
            Mode::Persistent,
            source,
            RecordingAdapter::default(),
            &settings(64, 1000),
        );
        while harness.step().unwrap() != LoopState::Done {}
        assert_eq!(harness.adapter().seen[1], b"{}".to_vec());
        assert!(harness.arena.is_empty());
    }

    #[test]
    fn source_failure_is_propagated() {
        let harness = IterationLoop::new(
            Mode::Persistent,
            FailingSource,
            RecordingAdapter::default(),
            &settings(64, 1000),
        );
        assert!(matches!(harness.run(), Err(SourceError::Io(_))));
    }

    #[test]
    fn done_is_terminal() {
        let mut harness = IterationLoop::new(
            Mode::OneShot,
            OneShotSource::new(io::empty()),
            JsonTreeAdapter,
            &settings(64, 1000),
        );
        while harness.step().unwrap() != LoopState::Done {}
        assert_eq!(harness.step().unwrap(), LoopState::Done);
    }
}
