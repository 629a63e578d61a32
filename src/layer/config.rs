//! Completion policies for one send or receive action.

use crate::container::{Container, ContainerSpec};

/// Governs when one send/receive call on a layer is complete.
///
/// A configuration is stateless across calls; a fresh one is built per
/// action. Matching is strict in list order for both directions.
#[derive(Debug, Clone)]
pub enum LayerConfiguration {
    /// Send/receive an exact list, stop when every listed container
    /// exists (or the stream ends).
    Specific(Vec<ContainerSpec>),
    /// Receive must match the list pairwise; the first received container
    /// whose structure does not match the next expected one fails the
    /// action immediately.
    Tight(Vec<ContainerSpec>),
    /// Receive until a container matching the target appears; anything
    /// arriving before (or with) it is accepted without policy.
    ReceiveTill(ContainerSpec),
}

/// Outcome of evaluating received containers against a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Keep receiving.
    Unsatisfied,
    /// The policy is complete; stop receiving.
    Satisfied,
    /// Tight policy mismatch; stop receiving and report.
    Mismatch(Mismatch),
}

/// A Tight policy failure: what was expected and what arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Position in the configured list.
    pub index: usize,
    pub expected: ContainerSpec,
    pub actual: Option<u8>,
}

impl LayerConfiguration {
    /// The container templates for the send path.
    ///
    /// `ReceiveTill` has no send meaning; it yields an empty list.
    pub fn send_specs(&self) -> &[ContainerSpec] {
        match self {
            LayerConfiguration::Specific(specs) | LayerConfiguration::Tight(specs) => specs,
            LayerConfiguration::ReceiveTill(_) => &[],
        }
    }

    /// Evaluate the received containers, in arrival order, against this
    /// policy.
    pub fn evaluate(&self, received: &[Container]) -> Evaluation {
        match self {
            LayerConfiguration::Specific(specs) => {
                // Match the configured list as an in-order subsequence of
                // what arrived. Interleaved unrelated containers are fine.
                let mut pending = specs.iter();
                let mut next = pending.next();
                for container in received {
                    match next {
                        Some(spec) if spec.matches(container) => next = pending.next(),
                        _ => {}
                    }
                }
                if next.is_none() {
                    Evaluation::Satisfied
                } else {
                    Evaluation::Unsatisfied
                }
            }
            LayerConfiguration::Tight(specs) => {
                for (index, container) in received.iter().enumerate() {
                    match specs.get(index) {
                        Some(spec) if spec.matches(container) => {}
                        Some(spec) => {
                            return Evaluation::Mismatch(Mismatch {
                                index,
                                expected: spec.clone(),
                                actual: container.kind_byte(),
                            });
                        }
                        None => {
                            // More containers than configured is a
                            // structural mismatch too.
                            return Evaluation::Mismatch(Mismatch {
                                index,
                                expected: ContainerSpec::new(container.kind()),
                                actual: container.kind_byte(),
                            });
                        }
                    }
                }
                if received.len() == specs.len() {
                    Evaluation::Satisfied
                } else {
                    Evaluation::Unsatisfied
                }
            }
            LayerConfiguration::ReceiveTill(target) => {
                if received.iter().any(|c| target.matches(c)) {
                    Evaluation::Satisfied
                } else {
                    Evaluation::Unsatisfied
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerKind, MessageContainer};

    fn msg(kind: u8) -> Container {
        Container::Message(MessageContainer::new(kind, vec![kind]))
    }

    fn spec(kind: u8) -> ContainerSpec {
        ContainerSpec::new(ContainerKind::Message).with_kind_byte(kind)
    }

    #[test]
    fn specific_matches_subsequence() {
        let config = LayerConfiguration::Specific(vec![spec(1), spec(2)]);

        assert_eq!(config.evaluate(&[msg(1)]), Evaluation::Unsatisfied);
        // Unrelated container interleaved is tolerated.
        assert_eq!(
            config.evaluate(&[msg(1), msg(9), msg(2)]),
            Evaluation::Satisfied
        );
        // Order matters.
        assert_eq!(config.evaluate(&[msg(2), msg(1)]), Evaluation::Unsatisfied);
    }

    #[test]
    fn tight_fails_on_first_mismatch() {
        let config = LayerConfiguration::Tight(vec![spec(1), spec(2)]);

        assert_eq!(config.evaluate(&[msg(1)]), Evaluation::Unsatisfied);
        assert_eq!(config.evaluate(&[msg(1), msg(2)]), Evaluation::Satisfied);

        let Evaluation::Mismatch(m) = config.evaluate(&[msg(2)]) else {
            panic!("expected mismatch");
        };
        assert_eq!(m.index, 0);
        assert_eq!(m.actual, Some(2));
    }

    #[test]
    fn tight_rejects_excess() {
        let config = LayerConfiguration::Tight(vec![spec(1)]);
        assert!(matches!(
            config.evaluate(&[msg(1), msg(1)]),
            Evaluation::Mismatch(_)
        ));
    }

    #[test]
    fn receive_till_stops_at_target() {
        let config = LayerConfiguration::ReceiveTill(spec(20));
        assert_eq!(config.evaluate(&[msg(1), msg(2)]), Evaluation::Unsatisfied);
        assert_eq!(
            config.evaluate(&[msg(1), msg(20)]),
            Evaluation::Satisfied
        );
    }
}
