#![forbid(unsafe_code)]

use std::collections::HashMap;

use cnd_ast::{Expr, Span};
use tracing::debug;

use crate::config::ShadowPolicy;
use crate::error::ShapeError;
use crate::shape::ShapeDescriptor;

/// Scope-structured table of the shapes visible at the current program point.
///
/// The bottom frame is file scope and is never popped. Each `{` pushes a frame
/// and the matching `}` drops it along with every shape declared inside.
#[derive(Debug)]
pub struct ShapeRegistry {
    frames: Vec<Frame>,
    policy: ShadowPolicy,
}

#[derive(Debug, Default)]
struct Frame {
    shapes: HashMap<String, ShapeDescriptor>,
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new(ShadowPolicy::Allow)
    }
}

impl ShapeRegistry {
    pub fn new(policy: ShadowPolicy) -> Self {
        Self {
            frames: vec![Frame::default()],
            policy,
        }
    }

    /// Number of open block scopes; 0 at file scope.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn enter_scope(&mut self) {
        self.frames.push(Frame::default());
        debug!(depth = self.depth(), "enter scope");
    }

    /// Close the innermost scope. `span` is the closing brace, reported when
    /// there is no scope left to close.
    pub fn exit_scope(&mut self, span: Span) -> Result<(), ShapeError> {
        if self.frames.len() == 1 {
            return Err(ShapeError::UnbalancedScope { span });
        }
        if let Some(frame) = self.frames.pop() {
            debug!(
                depth = self.depth() + 1,
                dropped = frame.shapes.len(),
                "exit scope"
            );
        }
        Ok(())
    }

    /// Bind `desc` in the innermost scope, shadowing any visible shape of the
    /// same name unless the policy forbids it.
    pub fn declare(&mut self, desc: ShapeDescriptor) -> Result<(), ShapeError> {
        let previous = match self.policy {
            ShadowPolicy::Allow => None,
            ShadowPolicy::ForbidSameScope => self.innermost().shapes.get(desc.name()),
            ShadowPolicy::Forbid => self.get(desc.name()),
        };
        if let Some(previous) = previous {
            return Err(ShapeError::Redeclaration {
                name: desc.name().to_string(),
                span: desc.span(),
                previous: previous.span(),
            });
        }

        debug!(
            symbol = desc.name(),
            rank = desc.rank(),
            order = desc.order().as_str(),
            depth = self.depth(),
            "declare shape"
        );
        let frame = self.innermost_mut();
        frame.shapes.insert(desc.name().to_string(), desc);
        Ok(())
    }

    /// Innermost visible shape for `name`.
    pub fn get(&self, name: &str) -> Option<&ShapeDescriptor> {
        self.frames.iter().rev().find_map(|f| f.shapes.get(name))
    }

    /// Like [`ShapeRegistry::get`], but a missing shape is an `UnknownShape`
    /// error at `span`.
    pub fn lookup(&self, name: &str, span: Span) -> Result<&ShapeDescriptor, ShapeError> {
        self.get(name).ok_or_else(|| ShapeError::UnknownShape {
            name: name.to_string(),
            span,
            help: None,
        })
    }

    /// Close the open axes of the innermost visible `name` with `extents`, in
    /// axis order. The resolved shape is bound in the innermost scope, so it
    /// ends with the block holding the allocation and the extents it names.
    pub fn resolve_open(
        &mut self,
        name: &str,
        extents: &[Expr],
        span: Span,
    ) -> Result<&ShapeDescriptor, ShapeError> {
        let Some(current) = self.get(name) else {
            return Err(ShapeError::UnknownShape {
                name: name.to_string(),
                span,
                help: None,
            });
        };
        let open = current.open_axes().len();
        if extents.len() != open {
            return Err(ShapeError::HelperArity {
                helper: "allocation".to_string(),
                expected: format!("{open} extent"),
                found: extents.len(),
                span,
            });
        }
        let resolved = current.with_resolved(extents);
        if open > 0 {
            debug!(symbol = name, resolved = open, depth = self.depth(), "resolve open axes");
        }
        let frame = self.innermost_mut();
        let slot = frame.shapes.entry(name.to_string()).insert_entry(resolved);
        Ok(slot.into_mut())
    }

    /// Every visible shape with the depth of its scope, innermost first.
    pub fn visible(&self) -> Vec<(usize, &ShapeDescriptor)> {
        let mut out: Vec<(usize, &ShapeDescriptor)> = Vec::new();
        for (depth, frame) in self.frames.iter().enumerate().rev() {
            let mut shapes: Vec<&ShapeDescriptor> = frame.shapes.values().collect();
            shapes.sort_by_key(|s| s.name());
            for s in shapes {
                if !out.iter().any(|(_, seen)| seen.name() == s.name()) {
                    out.push((depth, s));
                }
            }
        }
        out
    }

    fn innermost(&self) -> &Frame {
        // The file scope frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn innermost_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{AxisSpec, StorageOrder};
    use cnd_ast::span;

    fn desc(name: &str, rank: usize, at: usize) -> ShapeDescriptor {
        let axes = (0..rank)
            .map(|_| AxisSpec::new(Expr::int(0), Expr::int(3)))
            .collect();
        ShapeDescriptor::new(name, StorageOrder::RowMajor, axes, span(at, 1))
    }

    #[test]
    fn inner_declarations_vanish_on_exit() {
        let mut reg = ShapeRegistry::default();
        reg.enter_scope();
        reg.declare(desc("a", 2, 0)).unwrap();
        assert_eq!(reg.lookup("a", span(5, 1)).unwrap().rank(), 2);
        reg.exit_scope(span(9, 1)).unwrap();
        assert!(matches!(
            reg.lookup("a", span(10, 1)),
            Err(ShapeError::UnknownShape { .. })
        ));
    }

    #[test]
    fn shadowing_restores_the_outer_shape() {
        let mut reg = ShapeRegistry::default();
        reg.declare(desc("a", 1, 0)).unwrap();
        reg.enter_scope();
        reg.declare(desc("a", 3, 4)).unwrap();
        assert_eq!(reg.get("a").unwrap().rank(), 3);
        reg.exit_scope(span(8, 1)).unwrap();
        assert_eq!(reg.get("a").unwrap().rank(), 1);
    }

    #[test]
    fn same_scope_redeclaration_replaces_by_default() {
        let mut reg = ShapeRegistry::default();
        reg.declare(desc("a", 1, 0)).unwrap();
        reg.declare(desc("a", 2, 4)).unwrap();
        assert_eq!(reg.get("a").unwrap().rank(), 2);
    }

    #[test]
    fn policies_reject_redeclaration() {
        let mut reg = ShapeRegistry::new(ShadowPolicy::ForbidSameScope);
        reg.declare(desc("a", 1, 0)).unwrap();
        reg.enter_scope();
        reg.declare(desc("a", 2, 4)).unwrap();
        let err = reg.declare(desc("a", 2, 8)).unwrap_err();
        assert!(matches!(err, ShapeError::Redeclaration { previous, .. } if previous == span(4, 1)));

        let mut reg = ShapeRegistry::new(ShadowPolicy::Forbid);
        reg.declare(desc("a", 1, 0)).unwrap();
        reg.enter_scope();
        assert!(matches!(
            reg.declare(desc("a", 2, 4)),
            Err(ShapeError::Redeclaration { .. })
        ));
    }

    #[test]
    fn file_scope_cannot_be_exited() {
        let mut reg = ShapeRegistry::default();
        assert!(matches!(
            reg.exit_scope(span(0, 1)),
            Err(ShapeError::UnbalancedScope { .. })
        ));
    }

    #[test]
    fn open_axes_resolve_for_the_allocating_block_only() {
        let mut reg = ShapeRegistry::default();
        let d = ShapeDescriptor::new(
            "a",
            StorageOrder::RowMajor,
            vec![AxisSpec::open(Expr::int(1))],
            span(0, 1),
        );
        reg.declare(d).unwrap();
        reg.enter_scope();
        reg.resolve_open("a", &[Expr::var("n")], span(4, 1)).unwrap();
        assert!(reg.get("a").unwrap().open_axes().is_empty());
        assert!(matches!(
            reg.resolve_open("a", &[Expr::var("n")], span(6, 1)),
            Err(ShapeError::HelperArity { found: 1, .. })
        ));
        reg.exit_scope(span(9, 1)).unwrap();
        assert_eq!(reg.get("a").unwrap().open_axes(), [0]);

        reg.resolve_open("a", &[Expr::var("m")], span(12, 1)).unwrap();
        assert!(reg.get("a").unwrap().open_axes().is_empty());
    }

    #[test]
    fn visible_lists_innermost_binding_once() {
        let mut reg = ShapeRegistry::default();
        reg.declare(desc("a", 1, 0)).unwrap();
        reg.declare(desc("b", 1, 2)).unwrap();
        reg.enter_scope();
        reg.declare(desc("a", 2, 4)).unwrap();
        let v: Vec<(usize, &str, usize)> = reg
            .visible()
            .into_iter()
            .map(|(d, s)| (d, s.name(), s.rank()))
            .collect();
        assert_eq!(v, vec![(1, "a", 2), (0, "b", 1)]);
    }
}
