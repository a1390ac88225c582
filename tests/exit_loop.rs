use flatvmm::vmm::exit::fake;
use flatvmm::{
    Devices, ExitRecord, FatalExit, IoDirection, KeySource, LoopLimits, LoopState, ManualClock, NoKeys, VcpuRun,
    VmLoop, VmmError,
};
use std::collections::VecDeque;

/// Replays canned exit records and keeps every record the loop handed back,
/// so the values written for IN exits can be inspected.
struct ScriptedVcpu {
    script: VecDeque<Vec<u8>>,
    done: Vec<Vec<u8>>,
}

impl VcpuRun for ScriptedVcpu {
    fn run(&mut self) -> Result<ExitRecord<'_>, VmmError> {
        let next = self.script.pop_front().expect("guest ran past the end of its script");
        self.done.push(next);
        let current = self.done.last_mut().unwrap();
        Ok(ExitRecord::new(current))
    }
}

type TestLoop<K> = VmLoop<ScriptedVcpu, K, Vec<u8>, ManualClock>;

fn vm_loop<K: KeySource>(script: Vec<Vec<u8>>, keys: K, clock: ManualClock, limits: LoopLimits) -> TestLoop<K> {
    let devices = Devices::new(500, 32, Vec::new(), clock);
    let vcpu = ScriptedVcpu { script: script.into(), done: Vec::new() };
    VmLoop::new(vcpu, keys, devices, limits)
}

fn simple(script: Vec<Vec<u8>>) -> TestLoop<NoKeys> {
    vm_loop(script, NoKeys, ManualClock::default(), LoopLimits::default())
}

/// Byte the loop left in the payload of the `n`th exit.
fn payload<K: KeySource>(vml: &TestLoop<K>, n: usize) -> u8 {
    vml.vcpu().done[n][fake::PIO_DATA_OFFSET as usize]
}

fn fatal_of<K: KeySource>(mut vml: TestLoop<K>) -> FatalExit {
    let err = vml.run_until_exit().unwrap_err();
    let fatal = err.fatal().cloned().expect("loop should end fatally");
    assert_eq!(vml.state(), &LoopState::Fatal(fatal.clone()));
    fatal
}

#[test]
fn prints_a_line_and_halts() {
    let mut vml = simple(vec![fake::io_out(0x42, b'5'), fake::io_out(0x42, b'\n'), fake::halt()]);
    let summary = vml.run_until_exit().unwrap();
    assert_eq!(vml.state(), &LoopState::Halted);
    assert_eq!(vml.devices().console.sink().as_slice(), b"5\n");
    assert_eq!(summary.exits.total, 3);
    assert_eq!(summary.exits.io, 2);
    assert_eq!(summary.console_bytes, 2);
}

#[test]
fn halt_flushes_unterminated_line() {
    let mut vml = simple(vec![fake::io_out(0x42, b'o'), fake::io_out(0x42, b'k'), fake::halt()]);
    vml.run_until_exit().unwrap();
    assert_eq!(vml.devices().console.sink().as_slice(), b"ok");
    assert!(vml.devices().console.pending().is_empty());
}

#[test]
fn halted_loop_stays_halted() {
    let mut vml = simple(vec![fake::halt()]);
    assert_eq!(vml.step().unwrap(), LoopState::Halted);
    // the script is exhausted; a further run call would panic
    assert_eq!(vml.step().unwrap(), LoopState::Halted);
    assert_eq!(vml.counters().total, 1);
}

#[test]
fn guest_reads_host_keys() {
    let keys: VecDeque<u8> = b"xy".iter().copied().collect();
    let script = vec![
        fake::io_in(0x45),
        fake::io_in(0x44),
        fake::io_in(0x44),
        fake::io_out(0x45, 0),
        fake::io_in(0x45),
        fake::io_in(0x44),
        fake::halt(),
    ];
    let mut vml = vm_loop(script, keys, ManualClock::default(), LoopLimits::default());
    vml.run_until_exit().unwrap();
    // one key is pulled in per iteration, before the run call
    assert_eq!(payload(&vml, 0), 1);
    assert_eq!(payload(&vml, 1), b'x');
    assert_eq!(payload(&vml, 2), b'y');
    assert_eq!(payload(&vml, 4), 0);
    assert_eq!(payload(&vml, 5), 0);
    assert_eq!(vml.devices().keyboard.current_key(), b'y');
}

#[test]
fn guest_polls_timer() {
    let clock = ManualClock::default();
    let script = vec![
        fake::io_out(0x46, 100),
        fake::io_out(0x47, 1),
        fake::io_in(0x47),
        fake::io_in(0x47),
        fake::io_in(0x47),
        fake::io_in(0x47),
        fake::halt(),
    ];
    let mut vml = vm_loop(script, NoKeys, clock.clone(), LoopLimits::default());
    for now in [0, 0, 50, 150, 150, 250] {
        clock.set(now);
        assert_eq!(vml.step().unwrap(), LoopState::Running);
    }
    assert_eq!(vml.step().unwrap(), LoopState::Halted);

    let status: Vec<u8> = (2..6).map(|n| payload(&vml, n)).collect();
    assert_eq!(status, vec![0x01, 0x03, 0x01, 0x03]);
}

#[test]
fn every_table_entry_dispatches() {
    let script = vec![
        fake::io_out(0x42, b'a'),
        fake::io_in(0x44),
        fake::io_in(0x45),
        fake::io_out(0x45, 1),
        fake::io_out(0x46, 10),
        fake::io_out(0x47, 1),
        fake::io_in(0x47),
        fake::halt(),
    ];
    let mut vml = simple(script);
    let summary = vml.run_until_exit().unwrap();
    assert_eq!(summary.exits.io, 7);
    assert_eq!(vml.devices().console.pending(), b"a");
    assert_eq!(vml.devices().timer.interval_ms(), 10);
    assert!(vml.devices().timer.enabled());
}

#[test]
fn unregistered_port_is_fatal() {
    let vml = simple(vec![fake::io_out(0x3f8, b'a'), fake::halt()]);
    assert_eq!(
        fatal_of(vml),
        FatalExit::UnhandledIo { port: 0x3f8, direction: IoDirection::Out, size: 1, count: 1 }
    );
}

#[test]
fn wrong_direction_is_fatal() {
    let vml = simple(vec![fake::io_in(0x42)]);
    assert!(matches!(fatal_of(vml), FatalExit::UnhandledIo { port: 0x42, direction: IoDirection::In, .. }));
    let vml = simple(vec![fake::io_out(0x44, 0)]);
    assert!(matches!(fatal_of(vml), FatalExit::UnhandledIo { port: 0x44, .. }));
}

#[test]
fn wide_or_repeated_io_is_fatal() {
    let vml = simple(vec![fake::io(IoDirection::Out, 0x42, 2, 1, 0)]);
    assert!(matches!(fatal_of(vml), FatalExit::UnhandledIo { size: 2, .. }));
    let vml = simple(vec![fake::io(IoDirection::In, 0x45, 1, 4, 0)]);
    assert!(matches!(fatal_of(vml), FatalExit::UnhandledIo { count: 4, .. }));
}

#[test]
fn payload_outside_record_is_fatal() {
    let mut exit = fake::io_out(0x42, b'a');
    fake::set_data_offset(&mut exit, fake::RECORD_LEN as u64);
    assert!(matches!(fatal_of(simple(vec![exit])), FatalExit::RecordBounds { .. }));
}

#[test]
fn hardware_faults_are_fatal() {
    assert_eq!(
        fatal_of(simple(vec![fake::fail_entry(0x80000021, 0)])),
        FatalExit::FailEntry { reason: 0x80000021, cpu: 0 }
    );
    assert_eq!(fatal_of(simple(vec![fake::internal_error(3)])), FatalExit::InternalError { suberror: 3 });
    assert_eq!(fatal_of(simple(vec![fake::record(0x1234)])), FatalExit::UnknownExit { reason: 0x1234 });
}

#[test]
fn mmio_is_reported_and_skipped() {
    let script = vec![fake::mmio(0xd000_0000, [0; 8], 1, false), fake::halt()];
    let mut vml = simple(script);
    let summary = vml.run_until_exit().unwrap();
    assert_eq!(summary.exits.mmio, 1);
    assert_eq!(summary.exits.total, 2);
}

#[test]
fn exit_budget_stops_spinning_guest() {
    let script = (0..10).map(|_| fake::io_out(0x42, b'.')).collect();
    let limits = LoopLimits { max_exits: Some(3), timeout_ms: None };
    let vml = vm_loop(script, NoKeys, ManualClock::default(), limits);
    assert_eq!(fatal_of(vml), FatalExit::ExitBudget { limit: 3 });
}

#[test]
fn deadline_stops_guest() {
    let clock = ManualClock::default();
    let script = (0..10).map(|_| fake::io_out(0x46, 1)).collect();
    let limits = LoopLimits { max_exits: None, timeout_ms: Some(100) };
    let mut vml = vm_loop(script, NoKeys, clock.clone(), limits);
    assert_eq!(vml.step().unwrap(), LoopState::Running);
    clock.set(99);
    assert_eq!(vml.step().unwrap(), LoopState::Running);
    clock.set(100);
    assert_eq!(vml.step().unwrap(), LoopState::Fatal(FatalExit::Deadline { timeout_ms: 100 }));
    assert_eq!(vml.counters().total, 2);
}
