use crate::*;

/// Dense var correspondence from a callee function into its caller, indexed by callee var.
#[derive(Clone, Debug)]
pub struct VarRemap {
  map: Vec<Option<VarHandle>>,
}

impl VarRemap {
  pub fn new(callee: &ShaderFunction) -> Self {
    Self {
      map: vec![None; callee.vars.len()],
    }
  }

  pub fn insert(&mut self, from: VarHandle, to: VarHandle) {
    if from.index() >= self.map.len() {
      self.map.resize(from.index() + 1, None);
    }
    self.map[from.index()] = Some(to);
  }

  pub fn get(&self, from: VarHandle) -> Option<VarHandle> {
    self.map.get(from.index()).copied().flatten()
  }
}

struct InlineCtx<'c> {
  callee: &'c ShaderFunction,
  params: &'c [NodeHandle],
  nodes: Vec<Option<NodeHandle>>,
  vars: Vec<Option<VarHandle>>,
  scopes: Vec<Option<ScopeHandle>>,
  return_scope: ScopeHandle,
}

/// Splice a copy of `callee` at the current position.
///
/// The copy sits in its own scope, a callee `Return` leaves that scope. Vars found in `remap`
/// resolve to the caller's vars, the remaining callee vars become fresh caller locals.
/// `Param(i)` resolves to `params[i]`.
pub fn inline_function(
  b: &mut FunctionBuilder,
  callee: &ShaderFunction,
  params: &[NodeHandle],
  remap: &VarRemap,
) -> Result<(), IrError> {
  log::trace!("inline {} into {}", callee.name, b.function().name);

  let mut vars = vec![None; callee.vars.len()];
  for (index, slot) in vars.iter_mut().enumerate() {
    *slot = remap.get(VarHandle(index as u32));
  }

  let return_scope = b.function_mut().new_scope();
  let mut ctx = InlineCtx {
    callee,
    params,
    nodes: vec![None; callee.nodes.len()],
    vars,
    scopes: vec![None; callee.scope_count as usize],
    return_scope,
  };

  b.push_block();
  let result = ctx.clone_block(b, &callee.body);
  let body = b.pop_block();
  result?;
  b.emit(Stmt::Scope {
    scope: return_scope,
    body,
  });
  Ok(())
}

impl<'c> InlineCtx<'c> {
  fn node(&self, node: NodeHandle) -> Result<NodeHandle, IrError> {
    self
      .nodes
      .get(node.index())
      .copied()
      .flatten()
      .ok_or(IrError::UndefinedNode(node))
  }

  fn var(&mut self, b: &mut FunctionBuilder, var: VarHandle) -> VarHandle {
    if let Some(mapped) = self.vars[var.index()] {
      return mapped;
    }
    let decl = self.callee.var(var);
    let mapped = b.make_local_var(decl.name, decl.ty);
    self.vars[var.index()] = Some(mapped);
    mapped
  }

  fn scope(&mut self, b: &mut FunctionBuilder, scope: ScopeHandle) -> ScopeHandle {
    let slot = scope.0 as usize;
    if slot >= self.scopes.len() {
      self.scopes.resize(slot + 1, None);
    }
    if let Some(mapped) = self.scopes[slot] {
      return mapped;
    }
    let mapped = b.function_mut().new_scope();
    self.scopes[slot] = Some(mapped);
    mapped
  }

  fn clone_block(&mut self, b: &mut FunctionBuilder, block: &[Stmt]) -> Result<(), IrError> {
    let callee = self.callee;
    for stmt in block {
      match stmt {
        Stmt::Node(node) => {
          let expr = &callee.node(*node).expr;
          let mapped = if let NodeExpr::Param(index) = expr {
            *self
              .params
              .get(*index as usize)
              .ok_or(IrError::MissingParameter { index: *index })?
          } else {
            // vars referenced by the expression are resolved up front
            if let NodeExpr::LoadVar(var) = expr {
              self.var(b, *var);
            }
            let vars = &self.vars;
            let nodes = &self.nodes;
            let expr = expr.try_map(
              |n| nodes.get(n.index()).copied().flatten().ok_or(IrError::UndefinedNode(n)),
              |v| vars[v.index()].unwrap_or(v),
            )?;
            b.make_expression(expr)
          };
          self.nodes[node.index()] = Some(mapped);
        }
        Stmt::StoreVar { var, value } => {
          let var = self.var(b, *var);
          let value = self.node(*value)?;
          b.store(var, value);
        }
        Stmt::StoreScratch {
          base,
          offset,
          value,
        } => {
          let offset = self.node(*offset)?;
          let value = self.node(*value)?;
          b.store_scratch(*base, offset, value);
        }
        Stmt::StoreGlobal { address, value } => {
          let address = self.node(*address)?;
          let value = self.node(*value)?;
          b.store_global(address, value);
        }
        Stmt::StoreShared { offset, value } => {
          let offset = self.node(*offset)?;
          let value = self.node(*value)?;
          b.store_shared(offset, value);
        }
        Stmt::StoreArg { slot, value } => {
          let value = self.node(*value)?;
          b.store_arg(*slot, value);
        }
        Stmt::If {
          condition,
          accept,
          reject,
        } => {
          let condition = self.node(*condition)?;
          b.push_block();
          let r = self.clone_block(b, accept);
          let accept = b.pop_block();
          r?;
          b.push_block();
          let r = self.clone_block(b, reject);
          let reject = b.pop_block();
          r?;
          b.emit(Stmt::If {
            condition,
            accept,
            reject,
          });
        }
        Stmt::Loop { body } => {
          b.push_block();
          let r = self.clone_block(b, body);
          let body = b.pop_block();
          r?;
          b.emit(Stmt::Loop { body });
        }
        Stmt::Scope { scope, body } => {
          let scope = self.scope(b, *scope);
          b.push_block();
          let r = self.clone_block(b, body);
          let body = b.pop_block();
          r?;
          b.emit(Stmt::Scope { scope, body });
        }
        Stmt::Exit(scope) => {
          let scope = self.scope(b, *scope);
          b.exit(scope);
        }
        Stmt::Return => b.exit(self.return_scope),
        Stmt::Break => b.do_break(),
        Stmt::Continue => b.do_continue(),
        Stmt::Terminate => b.terminate(),
      }
    }
    Ok(())
  }
}
