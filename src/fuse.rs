//! Smart constructors that collapse adjacent `MapOutput`/`FlatMapOutput`/
//! `Translate` nodes at construction time instead of letting them stack up
//! and pay an interpreter hop each (spec §4.3, §9 "Output fusion").
//!
//! Each constructor peeks one level into its source: if that source is
//! already the same kind of node (or, for `map_output`, a bare `Output`
//! whose chunk can just be mapped eagerly), it composes in place rather
//! than wrapping. Anything deeper is left alone — fusion is a shallow,
//! O(1) rewrite, not a tree-wide normalization pass.

use crate::algebra::{Action, Erased, ErasedFlatMap, ErasedMap, ErasedTranslate, Repr};

pub(crate) fn map_output(source: Repr, f: ErasedMap) -> Repr {
    match source {
        // A terminal has no output left to map over; pass through as-is
        // rather than pay an interpreter hop for a no-op wrapper.
        result @ Repr::Result(_) => result,
        Repr::Action(Action::Output(chunk)) => {
            Repr::Action(Action::Output(chunk.map_owned(|v| f(v))))
        }
        Repr::Action(Action::MapOutput { source: inner, f: g }) => {
            let composed: ErasedMap = std::sync::Arc::new(move |v: Erased| f(g(v)));
            Repr::Action(Action::MapOutput { source: inner, f: composed })
        }
        other => Repr::Action(Action::MapOutput { source: Box::new(other), f }),
    }
}

pub(crate) fn flat_map_output(source: Repr, f: ErasedFlatMap) -> Repr {
    match source {
        result @ Repr::Result(_) => result,
        Repr::Action(Action::MapOutput { source: inner, f: g }) => {
            let composed: ErasedFlatMap = std::sync::Arc::new(move |v: Erased| f(g(v)));
            Repr::Action(Action::FlatMapOutput { source: inner, f: composed })
        }
        Repr::Action(Action::FlatMapOutput { source: inner, f: g }) => {
            let composed: ErasedFlatMap = std::sync::Arc::new(move |v: Erased| {
                crate::algebra::Repr::Action(Action::FlatMapOutput {
                    source: Box::new(g(v)),
                    f: f.clone(),
                })
            });
            Repr::Action(Action::FlatMapOutput { source: inner, f: composed })
        }
        other => Repr::Action(Action::FlatMapOutput { source: Box::new(other), f }),
    }
}

pub(crate) fn translate(source: Repr, adapt: ErasedTranslate) -> Repr {
    match source {
        result @ Repr::Result(_) => result,
        Repr::Action(Action::Translate { source: inner, adapt: prior }) => {
            let composed: ErasedTranslate = std::sync::Arc::new(move |fut| adapt(prior(fut)));
            Repr::Action(Action::Translate { source: inner, adapt: composed })
        }
        other => Repr::Action(Action::Translate { source: Box::new(other), adapt }),
    }
}
