//! The interpreter loop.
//!
//! One invocation per executor thread. The value stack and the registry
//! handle live on the thread's native stack; forked calls spawn a fresh OS
//! thread running this same function with a promise to publish into.
//!
//! Trap points (tail calls, returns, blocking-call resumes) are where an
//! executor observes pause and abort requests; between traps it runs
//! uninterrupted.

use crate::alloc::RefAllocator;
use crate::exec_state::ExecState;
use crate::platform::PlatformInterface;
use crate::pcall;
use crate::refs::{FutureRef, RefHeader, get_atomic_ref, get_future_ref, get_long, get_struct_ref};
use crate::registry::{ExecutorHandle, ExecutorRegistry};
use crate::stack::BasicStack;
use crate::strings;
use crate::value::Value;
use nov_asm::{Executable, OpCode, PCallCode};
use std::sync::Arc;

/// Runtime configuration handed to `run`.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub sockets_enabled: bool,
    pub intercept_interrupt: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            sockets_enabled: true,
            intercept_interrupt: false,
        }
    }
}

/// Everything an executor needs, shared across executor threads and the
/// collector. No process-wide singletons; forks clone the context.
#[derive(Clone)]
pub struct ExecContext {
    pub settings: Settings,
    pub exe: Arc<Executable>,
    pub iface: Arc<PlatformInterface>,
    pub registry: Arc<ExecutorRegistry>,
    pub alloc: Arc<RefAllocator>,
}

// Frame metadata: return instruction offset and return stack-home, stored
// as scalar values directly below the callee's stack-home.
const FRAME_META_SIZE: usize = 2;

/// Fork argument hand-off: the child copies `count` values from the
/// parent's stack before flagging the future as started; until then the
/// parent leaves them in place.
struct ForkArgs {
    ptr: *const Value,
    count: u8,
}

unsafe impl Send for ForkArgs {}

struct PromisePtr(*mut FutureRef);

unsafe impl Send for PromisePtr {}

/// Run bytecode starting at `entry_ip`. `entry_arg_src`/`entry_arg_count`
/// and `promise` are non-null for forked executors.
pub fn execute(
    ctx: &ExecContext,
    entry_ip: u32,
    entry_arg_count: u8,
    entry_arg_src: *const Value,
    promise: *mut FutureRef,
) -> ExecState {
    let mut stack = BasicStack::new();
    let stack_ptr: *mut BasicStack = &mut stack;
    let handle = ExecutorHandle::new(stack_ptr);
    ctx.registry.register(&handle);

    // A promise is pushed one slot below the root stack-home: visible to
    // the collector, invisible to the program.
    if !promise.is_null() {
        stack.push(Value::ref_to(promise as *mut RefHeader));
    }
    let root_sh = stack.size();

    let mut entry_ok = true;
    if entry_arg_count > 0 && !entry_arg_src.is_null() {
        if stack.alloc(entry_arg_count as usize) {
            for i in 0..entry_arg_count as usize {
                stack.set_value(root_sh + i, unsafe { *entry_arg_src.add(i) });
            }
        } else {
            handle.set_state(ExecState::StackOverflow);
            entry_ok = false;
        }
    }

    // From here on the parent may reclaim the argument slots.
    if !promise.is_null() {
        unsafe { (*promise).set_started() };
    }

    if entry_ok {
        run_loop(ctx, &mut stack, &handle, entry_ip, root_sh);
    }

    let end_state = handle.state();
    debug_assert!(end_state.is_terminal());

    // An aborted executor must not touch shared memory: the process is
    // shutting down and ownership of everything shared is gone.
    if end_state == ExecState::Aborted {
        return ExecState::Aborted;
    }

    if !promise.is_null() {
        unsafe {
            if end_state == ExecState::Success {
                (*promise).set_result(stack.pop());
            }
            (*promise).set_state_and_notify(end_state);
        }
    }

    ctx.registry.unregister(&handle);
    end_state
}

/// Spawn a forked executor and push the future tracking it.
fn fork(
    ctx: &ExecContext,
    stack: &mut BasicStack,
    arg_count: u8,
    tgt: u32,
) -> Result<(), ExecState> {
    let future = ctx.alloc.alloc_future().ok_or(ExecState::AllocFailed)?;

    let args = ForkArgs {
        ptr: stack.value_ptr(stack.size() - arg_count as usize),
        count: arg_count,
    };
    let child_ctx = ctx.clone();
    let child_promise = PromisePtr(future);
    let spawned = std::thread::Builder::new()
        .name("nov-exec".to_string())
        .spawn(move || {
            let promise = child_promise;
            let args = args;
            execute(&child_ctx, tgt, args.count, args.ptr, promise.0);
        });
    if spawned.is_err() {
        return Err(ExecState::Failed);
    }

    // The child still reads the arguments off this stack; wait for its
    // started handshake before releasing them.
    while !unsafe { (*future).has_started() } {
        std::thread::yield_now();
    }
    stack.rewind_to(stack.size() - arg_count as usize);

    if !stack.push(Value::ref_to(future as *mut RefHeader)) {
        return Err(ExecState::StackOverflow);
    }
    Ok(())
}

/// Build a frame for a call: arguments shift up over the two metadata
/// slots so they land at the callee's stack-home.
#[inline]
fn make_call(
    stack: &mut BasicStack,
    ip: &mut u32,
    sh: &mut usize,
    arg_count: u8,
    tgt: u32,
) -> Result<(), ExecState> {
    let arg_count = arg_count as usize;
    let arg_start = stack.size() - arg_count;
    if !stack.alloc(FRAME_META_SIZE) {
        return Err(ExecState::StackOverflow);
    }
    stack.move_values(arg_start, arg_start + FRAME_META_SIZE, arg_count);

    let new_sh = arg_start + FRAME_META_SIZE;
    stack.set_value(new_sh - 2, Value::uint(*ip));
    stack.set_value(new_sh - 1, Value::uint(*sh as u32));
    *ip = tgt;
    *sh = new_sh;
    Ok(())
}

/// Reuse the current frame: arguments move to the stack-home, everything
/// above is discarded and execution never returns here.
#[inline]
fn make_tail_call(stack: &mut BasicStack, ip: &mut u32, sh: usize, arg_count: u8, tgt: u32) {
    let arg_count = arg_count as usize;
    let arg_start = stack.size() - arg_count;
    stack.move_values(arg_start, sh, arg_count);
    stack.rewind_to(sh + arg_count);
    *ip = tgt;
}

/// Unpack a closure struct: bound arguments are pushed in order, the last
/// field is the call target.
unsafe fn push_closure(stack: &mut BasicStack, closure: Value) -> Result<(u8, u32), ExecState> {
    unsafe {
        let st = &*get_struct_ref(closure);
        debug_assert!(st.field_count() > 0);
        let bound_count = st.field_count() - 1;
        for i in 0..bound_count {
            if !stack.push(st.field(i)) {
                return Err(ExecState::StackOverflow);
            }
        }
        Ok((bound_count, st.last_field().as_uint()))
    }
}

fn run_loop(
    ctx: &ExecContext,
    stack: &mut BasicStack,
    handle: &ExecutorHandle,
    entry_ip: u32,
    root_sh: usize,
) {
    let exe: &Executable = &ctx.exe;
    let alloc: &RefAllocator = &ctx.alloc;
    let mut ip = entry_ip;
    let mut sh = root_sh;

    macro_rules! bail {
        ($state:expr) => {{
            handle.set_state($state);
            return;
        }};
    }
    macro_rules! read_u8 {
        () => {
            match exe.read_u8(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! read_u16 {
        () => {
            match exe.read_u16(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! read_i32 {
        () => {
            match exe.read_i32(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! read_u32 {
        () => {
            match exe.read_u32(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! read_i64 {
        () => {
            match exe.read_i64(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! read_f32 {
        () => {
            match exe.read_f32(&mut ip) {
                Some(v) => v,
                None => bail!(ExecState::InvalidAssembly),
            }
        };
    }
    macro_rules! push {
        ($val:expr) => {{
            let __push_val = $val;
            if !stack.push(__push_val) {
                bail!(ExecState::StackOverflow)
            }
        }};
    }
    macro_rules! push_int {
        ($val:expr) => {
            push!(Value::int($val))
        };
    }
    macro_rules! push_uint {
        ($val:expr) => {
            push!(Value::uint($val))
        };
    }
    macro_rules! push_bool {
        ($val:expr) => {
            push!(Value::bool_val($val))
        };
    }
    macro_rules! push_float {
        ($val:expr) => {
            push!(Value::float($val))
        };
    }
    macro_rules! push_long {
        ($val:expr) => {{
            let v: i64 = $val;
            if v >= 0 {
                push!(Value::pos_long(v))
            } else {
                match alloc.alloc_long(v) {
                    Some(boxed) => push!(Value::ref_to(boxed as *mut RefHeader)),
                    None => bail!(ExecState::AllocFailed),
                }
            }
        }};
    }
    macro_rules! push_ref {
        ($alloc_result:expr) => {
            match $alloc_result {
                Some(ptr) => push!(Value::ref_to(ptr as *mut RefHeader)),
                None => bail!(ExecState::AllocFailed),
            }
        };
    }
    macro_rules! pop_int {
        () => {
            stack.pop().as_int()
        };
    }
    macro_rules! pop_uint {
        () => {
            stack.pop().as_uint()
        };
    }
    macro_rules! pop_float {
        () => {
            stack.pop().as_float()
        };
    }
    macro_rules! pop_long {
        () => {
            unsafe { get_long(stack.pop()) }
        };
    }
    // Pop a string value, collapsing link chains to a flat string.
    macro_rules! pop_str {
        () => {
            match unsafe { strings::get_string_ref(alloc, stack.pop()) } {
                Some(s) => s,
                None => bail!(ExecState::AllocFailed),
            }
        };
    }
    macro_rules! call {
        ($arg_count:expr, $tgt:expr) => {
            if let Err(state) = make_call(stack, &mut ip, &mut sh, $arg_count, $tgt) {
                bail!(state)
            }
        };
    }
    macro_rules! call_forked {
        ($arg_count:expr, $tgt:expr) => {
            if let Err(state) = fork(ctx, stack, $arg_count, $tgt) {
                bail!(state)
            }
        };
    }
    macro_rules! push_closure {
        ($tgt:expr) => {
            match unsafe { push_closure(stack, $tgt) } {
                Ok(unpacked) => unpacked,
                Err(state) => bail!(state),
            }
        };
    }
    macro_rules! trap {
        () => {
            if handle.trap() {
                return;
            }
        };
    }

    loop {
        let op_byte = match exe.read_u8(&mut ip) {
            Some(byte) => byte,
            None => bail!(ExecState::InvalidAssembly),
        };
        let op = match OpCode::from_byte(op_byte) {
            Some(op) => op,
            None => bail!(ExecState::Failed),
        };

        match op {
            OpCode::LoadLitInt => {
                let v = read_i32!();
                push_int!(v);
            }
            OpCode::LoadLitIntSmall => {
                let v = read_u8!();
                push_int!(v as i32);
            }
            OpCode::LoadLitInt0 => push_int!(0),
            OpCode::LoadLitInt1 => push_int!(1),
            OpCode::LoadLitLong => {
                let v = read_i64!();
                push_long!(v);
            }
            OpCode::LoadLitFloat => {
                let v = read_f32!();
                push_float!(v);
            }
            OpCode::LoadLitString => {
                let index = read_u32!();
                if !exe.is_valid_lit_string(index) {
                    bail!(ExecState::InvalidAssembly);
                }
                let lit = exe.lit_string(index);
                push_ref!(unsafe { alloc.alloc_str_lit(lit.as_ptr(), lit.len() as u32) });
            }
            OpCode::LoadLitIp => {
                let v = read_u32!();
                push_uint!(v);
            }

            OpCode::StackAlloc => {
                let amount = read_u16!();
                if !stack.alloc_zeroed(amount as usize) {
                    bail!(ExecState::StackOverflow);
                }
            }
            OpCode::StackAllocSmall => {
                let amount = read_u8!();
                if !stack.alloc_zeroed(amount as usize) {
                    bail!(ExecState::StackOverflow);
                }
            }
            OpCode::StackStore => {
                let slot = read_u16!();
                let val = stack.pop();
                stack.set_value(sh + slot as usize, val);
            }
            OpCode::StackStoreSmall => {
                let slot = read_u8!();
                let val = stack.pop();
                stack.set_value(sh + slot as usize, val);
            }
            OpCode::StackLoad => {
                let slot = read_u16!();
                push!(stack.value(sh + slot as usize));
            }
            OpCode::StackLoadSmall => {
                let slot = read_u8!();
                push!(stack.value(sh + slot as usize));
            }
            OpCode::Dup => push!(stack.peek()),
            OpCode::Pop => {
                stack.pop();
            }
            OpCode::Swap => {
                let top = stack.size();
                let a = stack.value(top - 1);
                let b = stack.value(top - 2);
                stack.set_value(top - 1, b);
                stack.set_value(top - 2, a);
            }

            OpCode::AddInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_int!(a.wrapping_add(b));
            }
            OpCode::SubInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_int!(a.wrapping_sub(b));
            }
            OpCode::MulInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_int!(a.wrapping_mul(b));
            }
            OpCode::DivInt => {
                let b = pop_int!();
                let a = pop_int!();
                if b == 0 {
                    bail!(ExecState::DivByZero);
                }
                push_int!(a.wrapping_div(b));
            }
            OpCode::RemInt => {
                let b = pop_int!();
                let a = pop_int!();
                if b == 0 {
                    bail!(ExecState::DivByZero);
                }
                push_int!(a.wrapping_rem(b));
            }
            OpCode::NegInt => push_int!(pop_int!().wrapping_neg()),
            OpCode::LogicInvInt => push_bool!(pop_int!() == 0),
            OpCode::ShiftLeftInt => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_uint!(a.wrapping_shl(b));
            }
            OpCode::ShiftRightInt => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_uint!(a.wrapping_shr(b));
            }
            OpCode::AndInt => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_uint!(a & b);
            }
            OpCode::OrInt => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_uint!(a | b);
            }
            OpCode::XorInt => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_uint!(a ^ b);
            }
            OpCode::InvInt => push_uint!(!pop_uint!()),

            OpCode::AddLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a.wrapping_add(b));
            }
            OpCode::SubLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a.wrapping_sub(b));
            }
            OpCode::MulLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a.wrapping_mul(b));
            }
            OpCode::DivLong => {
                let b = pop_long!();
                let a = pop_long!();
                if b == 0 {
                    bail!(ExecState::DivByZero);
                }
                push_long!(a.wrapping_div(b));
            }
            OpCode::RemLong => {
                let b = pop_long!();
                let a = pop_long!();
                if b == 0 {
                    bail!(ExecState::DivByZero);
                }
                push_long!(a.wrapping_rem(b));
            }
            OpCode::NegLong => push_long!(pop_long!().wrapping_neg()),
            OpCode::ShiftLeftLong => {
                let b = pop_uint!();
                let a = pop_long!();
                push_long!(a.wrapping_shl(b));
            }
            OpCode::ShiftRightLong => {
                let b = pop_uint!();
                let a = pop_long!();
                push_long!(a.wrapping_shr(b));
            }
            OpCode::AndLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a & b);
            }
            OpCode::OrLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a | b);
            }
            OpCode::XorLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_long!(a ^ b);
            }
            OpCode::InvLong => push_long!(!pop_long!()),

            OpCode::AddFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a + b);
            }
            OpCode::SubFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a - b);
            }
            OpCode::MulFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a * b);
            }
            OpCode::DivFloat => {
                // IEEE-754: division by zero gives inf/nan, never fails.
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a / b);
            }
            OpCode::ModFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a % b);
            }
            OpCode::PowFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a.powf(b));
            }
            OpCode::SqrtFloat => push_float!(pop_float!().sqrt()),
            OpCode::SinFloat => push_float!(pop_float!().sin()),
            OpCode::CosFloat => push_float!(pop_float!().cos()),
            OpCode::TanFloat => push_float!(pop_float!().tan()),
            OpCode::ASinFloat => push_float!(pop_float!().asin()),
            OpCode::ACosFloat => push_float!(pop_float!().acos()),
            OpCode::ATanFloat => push_float!(pop_float!().atan()),
            OpCode::ATan2Float => {
                let b = pop_float!();
                let a = pop_float!();
                push_float!(a.atan2(b));
            }
            OpCode::NegFloat => push_float!(-pop_float!()),

            OpCode::AddString => {
                // Lazy concatenation: link the flat right-hand side onto
                // the left chain; collapse happens on first observation.
                let b = pop_str!();
                let a = unsafe { strings::get_string_or_link_ref(stack.pop()) };
                push_ref!(alloc.alloc_str_link(a, Value::ref_to(b as *mut RefHeader)));
            }
            OpCode::CombineChar => {
                let b = pop_int!() as u8;
                let a = pop_int!() as u8;
                push_ref!(strings::chars_to_string(alloc, a, b));
            }
            OpCode::AppendChar => {
                let b = pop_int!();
                let a = unsafe { strings::get_string_or_link_ref(stack.pop()) };
                push_ref!(alloc.alloc_str_link(a, Value::int(b)));
            }
            OpCode::LengthString => {
                let s = pop_str!();
                push_int!(unsafe { (*s).size() } as i32);
            }
            OpCode::IndexString => {
                let index = pop_int!();
                let s = pop_str!();
                push_int!(unsafe { strings::index_string(s, index) } as i32);
            }
            OpCode::SliceString => {
                let end = pop_int!();
                let start = pop_int!();
                let s = pop_str!();
                push_ref!(unsafe { strings::slice_string(alloc, s, start, end) });
            }

            OpCode::CheckEqInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_bool!(a == b);
            }
            OpCode::CheckEqLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_bool!(a == b);
            }
            OpCode::CheckEqFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_bool!(a == b);
            }
            OpCode::CheckEqString => {
                let b = pop_str!();
                let a = pop_str!();
                push_bool!(unsafe { strings::check_string_eq(a, b) });
            }
            OpCode::CheckEqIp => {
                let b = pop_uint!();
                let a = pop_uint!();
                push_bool!(a == b);
            }
            OpCode::CheckEqCallDynTgt => {
                // Call targets compare by instruction offset; for closure
                // structs that offset sits in the last field. Bound
                // arguments are not compared.
                let b = stack.pop();
                let b_tgt = if b.is_ref() {
                    unsafe { (*get_struct_ref(b)).last_field() }
                } else {
                    b
                };
                let a = stack.pop();
                let a_tgt = if a.is_ref() {
                    unsafe { (*get_struct_ref(a)).last_field() }
                } else {
                    a
                };
                push_bool!(a_tgt.as_uint() == b_tgt.as_uint());
            }
            OpCode::CheckGtInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_bool!(a > b);
            }
            OpCode::CheckGtLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_bool!(a > b);
            }
            OpCode::CheckGtFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_bool!(a > b);
            }
            OpCode::CheckLeInt => {
                let b = pop_int!();
                let a = pop_int!();
                push_bool!(a < b);
            }
            OpCode::CheckLeLong => {
                let b = pop_long!();
                let a = pop_long!();
                push_bool!(a < b);
            }
            OpCode::CheckLeFloat => {
                let b = pop_float!();
                let a = pop_float!();
                push_bool!(a < b);
            }
            OpCode::CheckStructNull => {
                let v = stack.pop();
                push_bool!(v.is_null_ref());
            }

            OpCode::ConvIntLong => {
                let v = pop_int!() as i64;
                push_long!(v);
            }
            OpCode::ConvIntFloat => push_float!(pop_int!() as f32),
            OpCode::ConvLongInt => push_int!(pop_long!() as i32),
            OpCode::ConvLongFloat => push_float!(pop_long!() as f32),
            OpCode::ConvFloatInt => push_int!(pop_float!() as i32),
            OpCode::ConvFloatLong => {
                let v = pop_float!() as i64;
                push_long!(v);
            }
            OpCode::ConvIntString => push_ref!(strings::int_to_string(alloc, pop_int!())),
            OpCode::ConvLongString => push_ref!(strings::long_to_string(alloc, pop_long!())),
            OpCode::ConvFloatString => push_ref!(strings::float_to_string(alloc, pop_float!())),
            OpCode::ConvCharString => push_ref!(strings::char_to_string(alloc, pop_int!() as u8)),
            OpCode::ConvIntChar => push_int!(pop_int!() as u8 as i32),
            OpCode::ConvLongChar => push_int!(pop_long!() as u8 as i32),
            OpCode::ConvFloatChar => push_int!(pop_float!() as u8 as i32),

            OpCode::MakeStruct => {
                let field_count = read_u8!();
                let st = match alloc.alloc_struct(field_count) {
                    Some(st) => st,
                    None => bail!(ExecState::AllocFailed),
                };
                // Fields sit in reverse order on the stack.
                for index in (0..field_count).rev() {
                    let val = stack.pop();
                    unsafe { (*st).set_field(index, val) };
                }
                push!(Value::ref_to(st as *mut RefHeader));
            }
            OpCode::MakeNullStruct => push!(Value::null_ref()),
            OpCode::StructLoadField => {
                let index = read_u8!();
                let st = unsafe { get_struct_ref(stack.pop()) };
                if index >= unsafe { (*st).field_count() } {
                    bail!(ExecState::InvalidAssembly);
                }
                push!(unsafe { (*st).field(index) });
            }
            OpCode::StructStoreField => {
                let index = read_u8!();
                let val = stack.pop();
                let st = unsafe { get_struct_ref(stack.pop()) };
                if index >= unsafe { (*st).field_count() } {
                    bail!(ExecState::InvalidAssembly);
                }
                unsafe { (*st).set_field(index, val) };
            }

            OpCode::MakeAtomic => {
                let initial = read_i32!();
                push_ref!(alloc.alloc_atomic(initial));
            }
            OpCode::AtomicLoad => {
                let atomic = unsafe { get_atomic_ref(stack.pop()) };
                push_int!(unsafe { (*atomic).load() });
            }
            OpCode::AtomicCompareSwap => {
                let expected = read_i32!();
                let desired = read_i32!();
                let atomic = unsafe { get_atomic_ref(stack.pop()) };
                push_int!(unsafe { (*atomic).compare_and_swap(expected, desired) });
            }
            OpCode::AtomicBlock => {
                let expected = read_i32!();
                // Keep the atomic on the stack while spinning so a
                // concurrent collection keeps it alive.
                let atomic = unsafe { get_atomic_ref(stack.peek()) };
                while unsafe { (*atomic).load() } != expected {
                    trap!();
                    std::thread::yield_now();
                }
                stack.pop();
            }

            OpCode::Jump => {
                ip = read_u32!();
            }
            OpCode::JumpIf => {
                let tgt = read_u32!();
                if pop_int!() != 0 {
                    ip = tgt;
                }
            }

            OpCode::Call => {
                let arg_count = read_u8!();
                let tgt = read_u32!();
                call!(arg_count, tgt);
            }
            OpCode::CallTail => {
                // Tail-call loops can run unbounded without a `Ret`; trap
                // here so they stay pausable.
                trap!();
                let arg_count = read_u8!();
                let tgt = read_u32!();
                make_tail_call(stack, &mut ip, sh, arg_count, tgt);
            }
            OpCode::CallForked => {
                let arg_count = read_u8!();
                let tgt = read_u32!();
                call_forked!(arg_count, tgt);
            }
            OpCode::CallDyn => {
                let arg_count = read_u8!();
                let tgt = stack.pop();
                if tgt.is_ref() {
                    let (bound_count, tgt_ip) = push_closure!(tgt);
                    call!(arg_count + bound_count, tgt_ip);
                } else {
                    call!(arg_count, tgt.as_uint());
                }
            }
            OpCode::CallDynTail => {
                trap!();
                let arg_count = read_u8!();
                let tgt = stack.pop();
                if tgt.is_ref() {
                    let (bound_count, tgt_ip) = push_closure!(tgt);
                    make_tail_call(stack, &mut ip, sh, arg_count + bound_count, tgt_ip);
                } else {
                    make_tail_call(stack, &mut ip, sh, arg_count, tgt.as_uint());
                }
            }
            OpCode::CallDynForked => {
                let arg_count = read_u8!();
                let tgt = stack.pop();
                if tgt.is_ref() {
                    let (bound_count, tgt_ip) = push_closure!(tgt);
                    call_forked!(arg_count + bound_count, tgt_ip);
                } else {
                    call_forked!(arg_count, tgt.as_uint());
                }
            }
            OpCode::Ret => {
                trap!();

                if sh == root_sh {
                    bail!(ExecState::Success);
                }
                debug_assert!(stack.size() >= sh + 1);

                let ret_val = stack.pop();
                let ret_ip = stack.value(sh - 2).as_uint();
                let ret_sh = stack.value(sh - 1).as_uint() as usize;
                stack.rewind_to(sh - FRAME_META_SIZE);
                ip = ret_ip;
                sh = ret_sh;
                push!(ret_val);
            }

            OpCode::FutureWaitNano => {
                let timeout = pop_long!();
                if timeout <= 0 {
                    // Non-blocking poll.
                    let future = unsafe { get_future_ref(stack.pop()) };
                    push_bool!(unsafe { (*future).poll() } != ExecState::Running);
                } else {
                    // Leave the future on the stack: a collection may run
                    // while we block.
                    let future = unsafe { get_future_ref(stack.peek()) };
                    handle.set_state(ExecState::Paused);
                    let resolved = unsafe { (*future).wait_nano(timeout) };
                    handle.set_state(ExecState::Running);
                    trap!();
                    stack.pop();
                    push_bool!(resolved);
                }
            }
            OpCode::FutureBlock => {
                let future = unsafe { get_future_ref(stack.peek()) };
                handle.set_state(ExecState::Paused);
                let future_state = unsafe { (*future).block() };
                handle.set_state(ExecState::Running);
                trap!();

                debug_assert!(future_state != ExecState::Running);
                if future_state == ExecState::Success {
                    stack.pop();
                    push!(unsafe { (*future).result() });
                } else {
                    // A failed child fails this executor too.
                    bail!(future_state);
                }
            }

            OpCode::PCall => {
                let code = match PCallCode::from_byte(read_u8!()) {
                    Some(code) => code,
                    None => bail!(ExecState::InvalidAssembly),
                };
                pcall::pcall(ctx, stack, handle, code);
                if handle.state() != ExecState::Running {
                    return;
                }
            }

            OpCode::Fail => bail!(ExecState::Failed),
        }
    }
}
