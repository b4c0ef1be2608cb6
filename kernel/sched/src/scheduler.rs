//! The scheduler proper: spawn, exit, policy changes and the context
//! switch core.

use crate::config::MAX_TASKS;
use crate::hw::SchedHw;
use crate::policy::{RoundRobin, SchedPolicy};
use crate::stack::StackArena;
use crate::task::{Pid, Task, TaskIdx, TaskTable};
use crate::SchedError;
use alloc::boxed::Box;
use alloc::vec::Vec;
use muon_core::SpinLock;

/// The preemptive scheduler.
pub struct Scheduler {
    tasks: TaskTable,
    stacks: StackArena,
    policy: Box<dyn SchedPolicy>,
    hw: Box<dyn SchedHw>,
    current: Option<TaskIdx>,
    /// Where the next pick starts when there is no current task: the
    /// sentinel before the first switch, the predecessor of the removed
    /// task after an exit.
    resume_from: TaskIdx,
    started: bool,
}

impl Scheduler {
    /// Creates a dormant scheduler: stack flags zeroed, sentinel root task
    /// in place, no current task, timer untouched.
    #[must_use]
    pub fn new(stack_region: &'static mut [u8], hw: Box<dyn SchedHw>) -> Self {
        Self {
            tasks: TaskTable::new(),
            stacks: StackArena::new(stack_region),
            policy: Box::new(RoundRobin),
            hw,
            current: None,
            resume_from: TaskIdx::SENTINEL,
            started: false,
        }
    }

    /// The task table, for policies and diagnostics.
    #[must_use]
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// The stack arena, for diagnostics and page-reuse tests.
    #[must_use]
    pub fn stacks(&self) -> &StackArena {
        &self.stacks
    }

    /// Index of the running task, if scheduling has started.
    #[must_use]
    pub fn current(&self) -> Option<TaskIdx> {
        self.current
    }

    /// Creates a task with an explicit exit handler.
    ///
    /// Claims a stack page, crafts the initial hardware exception frame
    /// `{arg, 0, 0, 0, 0, exit, entry, xPSR}` at its top with the software
    /// frame reserved below, picks the lowest free pid in
    /// `[1, MAX_TASKS]`, links the task at the tail of the list and hands
    /// it to the policy's `init_task_data`.
    ///
    /// # Errors
    ///
    /// [`SchedError::NoStackPage`], [`SchedError::NoPid`],
    /// [`SchedError::NoSlot`] on exhaustion, [`SchedError::PolicyFailure`]
    /// if the policy hook refuses; nothing is left allocated on failure.
    pub fn spawn_with_exit(
        &mut self,
        name: &'static str,
        entry: usize,
        exit: usize,
        arg: usize,
    ) -> Result<Pid, SchedError> {
        let page = self.stacks.alloc_page().ok_or(SchedError::NoStackPage)?;
        let sp = self.stacks.craft_initial_frame(page, entry, exit, arg);

        let pid = match (1..=MAX_TASKS as Pid).find(|&p| !self.tasks.pid_in_use(p)) {
            Some(pid) => pid,
            None => {
                self.stacks.free_page(page);
                return Err(SchedError::NoPid);
            }
        };

        let idx = match self.tasks.insert(pid, name, page, sp) {
            Ok(idx) => idx,
            Err(e) => {
                self.stacks.free_page(page);
                return Err(e);
            }
        };

        if let Some(task) = self.tasks.get_mut(idx) {
            if self.policy.init_task_data(task).is_err() {
                self.tasks.unlink(idx);
                self.stacks.free_page(page);
                return Err(SchedError::PolicyFailure);
            }
        }

        Ok(pid)
    }

    /// Creates a task with the default exit handler.
    ///
    /// The first successful spawn arms the tick timer and triggers an
    /// immediate reschedule; on the target, that interrupt enters the
    /// first task before this call can return to its caller, so the very
    /// first spawn never returns there.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_with_exit`](Self::spawn_with_exit).
    pub fn spawn(
        &mut self,
        name: &'static str,
        entry: usize,
        arg: usize,
    ) -> Result<Pid, SchedError> {
        let pid = self.spawn_with_exit(name, entry, default_task_exit as usize, arg)?;
        if !self.started {
            self.started = true;
            self.hw.start_tick();
            self.hw.trigger_reschedule();
        }
        Ok(pid)
    }

    /// Finds a task by pid; `None` outside `[1, MAX_TASKS]` or unused.
    #[must_use]
    pub fn task_by_pid(&self, pid: Pid) -> Option<&Task> {
        self.tasks.by_pid(pid).and_then(|idx| self.tasks.get(idx))
    }

    /// Swaps the scheduling policy.
    ///
    /// Runs the old policy's `on_remove` and the new one's `on_insert`,
    /// then drops each task's old policy data and re-initializes it with
    /// the new policy.
    ///
    /// # Errors
    ///
    /// [`SchedError::PolicyFailure`] (or the hook's error) as soon as any
    /// hook fails; the swap is aborted at that point.
    pub fn change_policy(&mut self, mut policy: Box<dyn SchedPolicy>) -> Result<(), SchedError> {
        self.policy.on_remove(&self.tasks)?;
        policy.on_insert(&self.tasks)?;

        let indices: Vec<TaskIdx> = self.tasks.iter().collect();
        for idx in indices {
            if let Some(task) = self.tasks.get_mut(idx) {
                task.set_policy_data(None);
                policy.init_task_data(task)?;
            }
        }

        self.policy = policy;
        Ok(())
    }

    /// The context switch core, run from handler context.
    ///
    /// Bootstraps the first task (writes its stack pointer into the PSP)
    /// or asks the policy for the next task and, when it differs from the
    /// current one, saves the live PSP into the current task and installs
    /// the next task's. The board's handler pushes the software frame
    /// before calling this and pops it afterward.
    pub fn schedule(&mut self) {
        let next = match self.current {
            Some(cur) => {
                let next = self.policy.pick_next(&self.tasks, cur);
                if next == cur || next == TaskIdx::SENTINEL {
                    return;
                }
                let psp = self.hw.read_psp();
                if let Some(task) = self.tasks.get_mut(cur) {
                    task.set_sp(psp);
                }
                next
            }
            None => {
                let next = self.policy.pick_next(&self.tasks, self.resume_from);
                if next == TaskIdx::SENTINEL {
                    return;
                }
                next
            }
        };

        if let Some(task) = self.tasks.get(next) {
            self.hw.write_psp(task.sp());
            self.current = Some(next);
        }
    }

    /// Default exit path: unlinks the current task, frees its stack page
    /// and policy data, and triggers the pending reschedule. The caller
    /// (the exiting task) is not expected to regain control.
    pub fn exit_current(&mut self) {
        let Some(cur) = self.current.take() else {
            return;
        };
        self.resume_from = self.tasks.prev_of(cur);
        if let Some(task) = self.tasks.unlink(cur) {
            if let Some(page) = task.stack_page() {
                self.stacks.free_page(page);
            }
        }
        self.hw.trigger_reschedule();
    }
}

/// Global scheduler instance.
static SCHEDULER: SpinLock<Option<Scheduler>> = SpinLock::new(None);

/// Initialize the global scheduler over the given stack region and
/// hardware surface. The scheduler stays dormant until the first spawn.
///
/// # Panics
///
/// Panics if called twice.
pub fn init(stack_region: &'static mut [u8], hw: Box<dyn SchedHw>) {
    let mut sched = SCHEDULER.lock();
    assert!(sched.is_none(), "scheduler already initialized");
    *sched = Some(Scheduler::new(stack_region, hw));
}

/// Execute a closure with the global scheduler.
///
/// Thread-context callers run this inside the board's critical section
/// (tick and PendSV masked); the handlers' own invocation is serialized
/// by the interrupt priority scheme. A reschedule triggered inside the
/// closure fires once the interrupts are unmasked again.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with_init("scheduler", f)
}

/// The exit handler wired into spawned tasks' initial link register: a
/// task returning from its entry function lands here, removes itself and
/// forces an immediate reschedule.
pub extern "C" fn default_task_exit() {
    with_scheduler(Scheduler::exit_current);
    // The pending context switch fires on exception return; nothing to do
    // but wait for it.
    loop {
        core::hint::spin_loop();
    }
}
