use crate::*;

pub enum NodeAction {
  /// keep the node definition at its place, after anything emitted while visiting it
  Keep,
  /// drop the definition, only valid for nodes nothing refers to
  Remove,
}

/// A rewrite over every instruction of a function.
///
/// The driver rebuilds the body: anything emitted through the builder while visiting an
/// instruction lands right before it, newly emitted instructions are not visited again.
pub trait InstructionPass {
  type Error;

  fn visit_node(&mut self, _b: &mut FunctionBuilder, _node: NodeHandle) -> Result<NodeAction, Self::Error> {
    Ok(NodeAction::Keep)
  }

  /// called for every statement that is neither a node definition nor control flow
  fn visit_stmt(&mut self, _b: &mut FunctionBuilder, stmt: Stmt) -> Result<Option<Stmt>, Self::Error> {
    Ok(Some(stmt))
  }
}

pub fn run_instruction_pass<P: InstructionPass>(
  function: &mut ShaderFunction,
  pass: &mut P,
) -> Result<(), P::Error> {
  let body = std::mem::take(&mut function.body);
  let mut builder = FunctionBuilder::new(function);
  rewrite_block(&mut builder, body, pass)
}

fn rewrite_block<P: InstructionPass>(
  b: &mut FunctionBuilder,
  block: Block,
  pass: &mut P,
) -> Result<(), P::Error> {
  for stmt in block {
    match stmt {
      Stmt::Node(node) => {
        if let NodeAction::Keep = pass.visit_node(b, node)? {
          b.emit(Stmt::Node(node));
        }
      }
      Stmt::If {
        condition,
        accept,
        reject,
      } => {
        b.push_block();
        rewrite_block(b, accept, pass)?;
        let accept = b.pop_block();
        b.push_block();
        rewrite_block(b, reject, pass)?;
        let reject = b.pop_block();
        b.emit(Stmt::If {
          condition,
          accept,
          reject,
        });
      }
      Stmt::Loop { body } => {
        b.push_block();
        rewrite_block(b, body, pass)?;
        let body = b.pop_block();
        b.emit(Stmt::Loop { body });
      }
      Stmt::Scope { scope, body } => {
        b.push_block();
        rewrite_block(b, body, pass)?;
        let body = b.pop_block();
        b.emit(Stmt::Scope { scope, body });
      }
      stmt => {
        if let Some(stmt) = pass.visit_stmt(b, stmt)? {
          b.emit(stmt);
        }
      }
    }
  }
  Ok(())
}

/// Turn every function level `Return` into an exit of a scope wrapping the whole body, so
/// code appended after the body runs for returning invocations too.
pub fn lower_returns_to_scope(function: &mut ShaderFunction) {
  let scope = function.new_scope();
  let body = std::mem::take(&mut function.body);
  let body = replace_returns(body, scope);
  function.body = vec![Stmt::Scope { scope, body }];
}

fn replace_returns(block: Block, scope: ScopeHandle) -> Block {
  block
    .into_iter()
    .map(|stmt| match stmt {
      Stmt::Return => Stmt::Exit(scope),
      Stmt::If {
        condition,
        accept,
        reject,
      } => Stmt::If {
        condition,
        accept: replace_returns(accept, scope),
        reject: replace_returns(reject, scope),
      },
      Stmt::Loop { body } => Stmt::Loop {
        body: replace_returns(body, scope),
      },
      Stmt::Scope { scope: inner, body } => Stmt::Scope {
        scope: inner,
        body: replace_returns(body, scope),
      },
      stmt => stmt,
    })
    .collect()
}
