use crate::*;

pub type Block = Vec<Stmt>;

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
  /// the definition point of a node, the node is evaluated here
  Node(NodeHandle),
  StoreVar {
    var: VarHandle,
    value: NodeHandle,
  },
  StoreScratch {
    base: ScratchBase,
    offset: NodeHandle,
    value: NodeHandle,
  },
  StoreGlobal {
    address: NodeHandle,
    value: NodeHandle,
  },
  StoreShared {
    offset: NodeHandle,
    value: NodeHandle,
  },
  StoreArg {
    slot: u32,
    value: NodeHandle,
  },
  If {
    condition: NodeHandle,
    accept: Block,
    reject: Block,
  },
  Loop {
    body: Block,
  },
  Break,
  Continue,
  /// a labeled region that `Exit` jumps to the end of
  Scope {
    scope: ScopeHandle,
    body: Block,
  },
  Exit(ScopeHandle),
  /// leave the current function
  Return,
  /// end the invocation, it never runs again
  Terminate,
}

impl Stmt {
  pub fn visit_operands(&self, mut f: impl FnMut(NodeHandle)) {
    match self {
      Stmt::Node(_) => {}
      Stmt::StoreVar { value, .. } | Stmt::StoreArg { value, .. } => f(*value),
      Stmt::StoreScratch { offset, value, .. } | Stmt::StoreShared { offset, value } => {
        f(*offset);
        f(*value);
      }
      Stmt::StoreGlobal { address, value } => {
        f(*address);
        f(*value);
      }
      Stmt::If { condition, .. } => f(*condition),
      Stmt::Loop { .. }
      | Stmt::Break
      | Stmt::Continue
      | Stmt::Scope { .. }
      | Stmt::Exit(_)
      | Stmt::Return
      | Stmt::Terminate => {}
    }
  }
}

pub(crate) fn visit_block<'a>(block: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
  for stmt in block {
    f(stmt);
    match stmt {
      Stmt::If { accept, reject, .. } => {
        visit_block(accept, f);
        visit_block(reject, f);
      }
      Stmt::Loop { body } | Stmt::Scope { body, .. } => visit_block(body, f),
      _ => {}
    }
  }
}
