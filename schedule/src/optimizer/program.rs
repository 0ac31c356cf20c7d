//! From an optimized [`Kernel`] to a linear instruction list and a [`Program`].

use std::collections::HashMap;
use std::sync::Arc;

use kernc_ir::{verify_ast, AstNode, AstOp, Op, UOp};
use tracing::debug;

use super::kernel::Kernel;
use super::renderer::Render;
use crate::error::Result;
use crate::estimate::flops_mem;
use crate::helpers::prod;
use crate::linearize::linearize;
use crate::lower::lower;

/// A kernel lowered to its final instruction list.
#[derive(Debug, Clone)]
pub struct LinearKernel {
    pub ast: Arc<AstNode>,
    pub uops: Vec<Arc<UOp>>,
    /// Launch grid, `None` when the device has no native threading.
    pub global_size: Option<[usize; 3]>,
    /// Workgroup size, `None` when the kernel uses no locals.
    pub local_size: Option<[usize; 3]>,
}

/// A rendered kernel with its launch dims and cost estimates.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub src: String,
    pub device: String,
    pub global_size: Option<[usize; 3]>,
    pub local_size: Option<[usize; 3]>,
    pub uops: Vec<Arc<UOp>>,
    /// ALU operations of one launch.
    pub op_estimate: u64,
    /// Bytes moved by one launch.
    pub mem_estimate: u64,
}

impl Program {
    /// Total threads of one launch.
    pub fn run_count(&self) -> u64 {
        let dims = |d: Option<[usize; 3]>| d.map_or(1, |d| prod(d.into_iter()) as u64);
        dims(self.global_size) * dims(self.local_size)
    }
}

impl Kernel {
    /// Lower the optimized AST and linearize it.
    #[tracing::instrument(skip_all, fields(kernel = %self.base_name()))]
    pub fn linearize(&self) -> Result<LinearKernel> {
        let ast = self.get_optimized_ast()?;
        verify_ast(&ast)?;
        let sink = lower(&ast, &self.opts)?;
        let uops = linearize(&sink, self.opts.supports_float4)?;

        let (mut global_size, mut local_size) =
            if self.opts.has_local { (Some([1; 3]), Some([1; 3])) } else { (None, None) };
        for u in &uops {
            let Op::Special { dim, name, size } = u.op() else { continue };
            if name.starts_with('i') {
                local_size = None;
            }
            let target = if name.starts_with('l') { local_size.as_mut() } else { global_size.as_mut() };
            if let Some(slot) = target.and_then(|sizes| sizes.get_mut(*dim)) {
                *slot = *size;
            }
        }
        debug!(uops = uops.len(), ?global_size, ?local_size, "linearized");
        Ok(LinearKernel { ast, uops, global_size, local_size })
    }

    /// Linearize, render and estimate the kernel.
    ///
    /// Every call registers a new kernel name.
    pub fn to_program(&self, render: &dyn Render) -> Result<Program> {
        self.to_program_named(render, self.name())
    }

    /// [`Kernel::to_program`] under a fixed function name.
    pub fn to_program_named(&self, render: &dyn Render, name: impl Into<String>) -> Result<Program> {
        let lin = self.linearize()?;
        let name = name.into();
        let src = render.render(&name, &lin.uops);
        let (ops, mem) = flops_mem(&lin.uops, true);

        let mut program = Program {
            name,
            src,
            device: self.opts.device.clone(),
            global_size: lin.global_size,
            local_size: lin.local_size,
            uops: lin.uops,
            op_estimate: 0,
            mem_estimate: 0,
        };
        let run_count = program.run_count();
        program.op_estimate = ops * run_count;
        program.mem_estimate = (mem * run_count).min(self.buffer_bytes());
        Ok(program)
    }

    /// Bytes of every global buffer access, counting each buffer once per
    /// access kind at its largest view.
    pub fn buffer_bytes(&self) -> u64 {
        let mut groups: HashMap<(bool, isize), u64> = HashMap::new();
        for x in self.ast.lazyops() {
            let (is_store, mb) = match &x.op {
                AstOp::Load(mb) => (false, mb),
                AstOp::Store(mb) => (true, mb),
                _ => continue,
            };
            if mb.is_local() {
                continue;
            }
            let bytes = (mb.dtype.bytes() * mb.st.real_size()) as u64;
            let entry = groups.entry((is_store, mb.idx)).or_default();
            *entry = (*entry).max(bytes);
        }
        groups.values().sum()
    }
}
