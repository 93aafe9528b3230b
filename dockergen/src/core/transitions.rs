//! Static transition table of the workflow state machine.
//!
//! Step functions report a [`Signal`]; the interpreter looks up the next
//! [`Step`] here. The table is data, not code, so every edge can be tested in
//! isolation.

use crate::core::types::Step;

/// What a step function reports back to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Succeeded,
    Failed,
    /// The refinement cap was already reached when Refine was entered.
    Exhausted,
    /// Classified fatal failure or unexpected error: go straight to Complete.
    Fatal,
}

/// Guard evaluated against the refinement counter after the step ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    BelowCap,
    AtCap,
}

impl Guard {
    fn holds(self, refinement_count: u32, max_refinements: u32) -> bool {
        match self {
            Guard::Always => true,
            Guard::BelowCap => refinement_count < max_refinements,
            Guard::AtCap => refinement_count >= max_refinements,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: Step,
    on: Signal,
    guard: Guard,
    to: Step,
}

const fn edge(from: Step, on: Signal, guard: Guard, to: Step) -> Transition {
    Transition {
        from,
        on,
        guard,
        to,
    }
}

const TRANSITIONS: &[Transition] = &[
    edge(Step::Analyze, Signal::Succeeded, Guard::Always, Step::Generate),
    edge(Step::Analyze, Signal::Failed, Guard::Always, Step::Complete),
    edge(Step::Generate, Signal::Succeeded, Guard::Always, Step::Build),
    edge(Step::Generate, Signal::Failed, Guard::Always, Step::Complete),
    edge(Step::Build, Signal::Succeeded, Guard::Always, Step::Validate),
    edge(Step::Build, Signal::Failed, Guard::BelowCap, Step::Refine),
    edge(Step::Build, Signal::Failed, Guard::AtCap, Step::Complete),
    edge(Step::Validate, Signal::Succeeded, Guard::Always, Step::Complete),
    edge(Step::Validate, Signal::Failed, Guard::BelowCap, Step::Refine),
    edge(Step::Validate, Signal::Failed, Guard::AtCap, Step::Complete),
    edge(Step::Refine, Signal::Succeeded, Guard::Always, Step::Generate),
    edge(Step::Refine, Signal::Exhausted, Guard::Always, Step::Complete),
    edge(Step::Refine, Signal::Failed, Guard::Always, Step::Complete),
];

/// Resolve the next step. Unknown combinations and `Fatal` end the run.
pub fn next_step(from: Step, signal: Signal, refinement_count: u32, max_refinements: u32) -> Step {
    if from == Step::Complete || signal == Signal::Fatal {
        return Step::Complete;
    }
    TRANSITIONS
        .iter()
        .find(|t| {
            t.from == from && t.on == signal && t.guard.holds(refinement_count, max_refinements)
        })
        .map(|t| t.to)
        .unwrap_or(Step::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges() {
        assert_eq!(next_step(Step::Analyze, Signal::Succeeded, 0, 3), Step::Generate);
        assert_eq!(next_step(Step::Generate, Signal::Succeeded, 0, 3), Step::Build);
        assert_eq!(next_step(Step::Build, Signal::Succeeded, 0, 3), Step::Validate);
        assert_eq!(next_step(Step::Validate, Signal::Succeeded, 0, 3), Step::Complete);
    }

    #[test]
    fn failures_before_build_complete_immediately() {
        assert_eq!(next_step(Step::Analyze, Signal::Failed, 0, 3), Step::Complete);
        assert_eq!(next_step(Step::Generate, Signal::Failed, 1, 3), Step::Complete);
    }

    #[test]
    fn build_and_validate_failures_respect_cap() {
        assert_eq!(next_step(Step::Build, Signal::Failed, 2, 3), Step::Refine);
        assert_eq!(next_step(Step::Build, Signal::Failed, 3, 3), Step::Complete);
        assert_eq!(next_step(Step::Validate, Signal::Failed, 0, 3), Step::Refine);
        assert_eq!(next_step(Step::Validate, Signal::Failed, 3, 3), Step::Complete);
    }

    #[test]
    fn zero_cap_never_refines() {
        assert_eq!(next_step(Step::Build, Signal::Failed, 0, 0), Step::Complete);
        assert_eq!(next_step(Step::Validate, Signal::Failed, 0, 0), Step::Complete);
    }

    #[test]
    fn refine_returns_to_generate_or_completes() {
        assert_eq!(next_step(Step::Refine, Signal::Succeeded, 1, 3), Step::Generate);
        assert_eq!(next_step(Step::Refine, Signal::Exhausted, 3, 3), Step::Complete);
    }

    #[test]
    fn fatal_bypasses_the_table_from_every_step() {
        for step in [
            Step::Analyze,
            Step::Generate,
            Step::Build,
            Step::Validate,
            Step::Refine,
        ] {
            assert_eq!(next_step(step, Signal::Fatal, 0, 3), Step::Complete);
        }
    }

    #[test]
    fn complete_is_absorbing() {
        assert_eq!(next_step(Step::Complete, Signal::Succeeded, 0, 3), Step::Complete);
    }
}
