use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::string::String;
use std::sync::Mutex as StdMutex;
use std::vec::Vec;

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Duration, Timer};

use crate::asynch::{self, Resources, State};
use crate::config::{AtConfig, URC_LINE_LEN};
use crate::error::{DeviceErrorType, Error};
use crate::scope::Scope;
use crate::test_helpers::{MockLink, MockPort};
use crate::urc::UrcParams;

struct TestConfig;

impl AtConfig for TestConfig {
    const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
    const URC_TIMEOUT: Duration = Duration::from_millis(10);
    const SEND_DELAY: Duration = Duration::from_millis(0);
    const TASK_EXIT_TIMEOUT: Duration = Duration::from_millis(200);
}

type TestState<'d> = State<'d, NoopRawMutex, MockPort<'d>, TestConfig, 256>;

fn test_state<'d>(link: &'d MockLink, resources: &'d Resources<NoopRawMutex>) -> TestState<'d> {
    State::new(link.port(), TestConfig, resources)
}

#[test]
fn reads_information_response() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+CSQ: 15,99\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CSQ").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CSQ:"), false).await;
        assert_eq!(at.scope(), Scope::Info);
        assert_eq!(at.read_int().await, Some(15));
        assert_eq!(at.read_int().await, Some(99));
        at.resp_stop().await;
        assert_eq!(at.scope(), Scope::None);
        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(link.sent(), "AT+CSQ\r");
}

#[test]
fn plain_error_has_no_code() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\nERROR\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CFUN=99").await;
        at.cmd_stop_read_resp().await;
        assert!(at.error_found());
        assert_eq!(at.last_device_error().err_type, DeviceErrorType::NoError);
        assert_eq!(at.last_3gpp_error(), 0);
        assert_eq!(at.unlock_return_error(), Err(Error::DeviceError));
    });
}

#[test]
fn cme_error_is_mapped_to_3gpp() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+CME ERROR: 107\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CGATT=1").await;
        at.cmd_stop_read_resp().await;

        let err = at.last_device_error();
        assert_eq!(err.err_type, DeviceErrorType::Cme);
        assert_eq!(err.code, 107);
        assert_eq!(at.last_3gpp_error(), 7);
        assert_eq!(at.scope(), Scope::None);
        assert_eq!(at.unlock_return_error(), Err(Error::DeviceError));
    });

    // The next cycle starts clean
    link.reply(b"\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        assert_eq!(at.last_3gpp_error(), 0);
        at.cmd_start("AT").await;
        at.cmd_stop_read_resp().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn urc_inside_response_is_dispatched_once() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static STAT: AtomicI32 = AtomicI32::new(-1);
    static STORE: fn(i32) = |stat| STAT.store(stat, Ordering::SeqCst);
    static ON_CREG: fn(&mut UrcParams<'_>) = |urc| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        if let Some(stat) = urc.read_int() {
            urc.defer(&STORE, stat).unwrap();
        }
    };

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, mut callbacks) = asynch::new(&state);

    block_on(client.set_urc_handler("+CREG:", &ON_CREG)).unwrap();

    link.reply(b"\r\n+CREG: 5\r\n\r\n+CSQ: 20,0\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CSQ").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CSQ:"), false).await;
        assert!(at.urc_matched());
        assert_eq!(at.read_int().await, Some(20));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);

    resources.callback_task.stop.signal(());
    block_on(callbacks.run());
    assert_eq!(STAT.load(Ordering::SeqCst), 5);
}

#[test]
fn resp_stop_twice_is_harmless() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT").await;
        at.cmd_stop().await;
        at.resp_start(None, false).await;
        at.resp_stop().await;
        at.resp_stop().await;
        assert_eq!(at.scope(), Scope::None);
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn writer_separates_parameters() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+USOWR=").await;
        at.write_int(3).await;
        at.write_string("hello", true).await;
        at.write_uint64(12_000_000_000).await;
        at.cmd_stop().await;

        at.use_delimiter(false);
        at.cmd_start("AT+X").await;
        at.write_string("ab", false).await;
        at.write_int(-5).await;
        at.cmd_stop().await;
        at.use_delimiter(true);

        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(link.sent(), "AT+USOWR=3,\"hello\",12000000000\rAT+Xab-5\r");
}

#[test]
fn quoted_string_keeps_delimiter() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+UDOPN: \"u-blox, AG\",7\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UDOPN=").await;
        at.write_int(12).await;
        at.cmd_stop().await;
        at.resp_start(Some("+UDOPN:"), false).await;

        let mut buf = [0; 16];
        let len = at.read_string(&mut buf, false).await.unwrap();
        assert_eq!(&buf[..len], b"u-blox, AG");
        assert_eq!(at.read_int().await, Some(7));

        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn long_string_is_truncated_but_consumed() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+CGMR: \"abcdefgh\",9\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CGMR").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CGMR:"), false).await;

        let mut buf = [0; 4];
        assert_eq!(at.read_string(&mut buf, false).await, Some(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(at.read_int().await, Some(9));

        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn consecutive_timeouts_are_counted() {
    static SEEN: StdMutex<Vec<i32>> = StdMutex::new(Vec::new());
    static RECORD: fn(i32) = |count| SEEN.lock().unwrap().push(count);

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, mut callbacks) = asynch::new(&state);

    block_on(async {
        client.set_at_timeout_callback(Some(&RECORD)).await;

        for _ in 0..3 {
            let mut at = client.lock().await.unwrap();
            assert!(!at.wait_char(b'>').await);
            assert_eq!(at.unlock_return_error(), Err(Error::DeviceError));
        }

        link.feed(b">");
        let mut at = client.lock().await.unwrap();
        assert!(at.wait_char(b'>').await);
        at.unlock();

        let mut at = client.lock().await.unwrap();
        assert!(!at.wait_char(b'>').await);
        at.unlock();
    });

    resources.callback_task.stop.signal(());
    block_on(callbacks.run());
    assert_eq!(*SEEN.lock().unwrap(), [1, 2, 3, 1]);
}

#[test]
fn info_resp_walks_every_line() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+CGDCONT: 1,\"IP\"\r\n+CGDCONT: 2,\"IPV6\"\r\n\r\nOK\r\n");
    let cids = block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CGDCONT?").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CGDCONT:"), false).await;

        let mut cids = Vec::new();
        while at.info_resp().await {
            cids.push(at.read_int().await.unwrap());
        }

        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
        cids
    });

    assert_eq!(cids, [1, 2]);
}

#[test]
fn info_elem_reads_bracketed_lists() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+COPS: (2,\"Op A\"),(1,\"Op B\"),,(0-4)\r\n\r\nOK\r\n");
    let found = block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+COPS=?").await;
        at.cmd_stop().await;
        at.resp_start(Some("+COPS:"), false).await;

        let mut found = Vec::new();
        for _ in 0..2 {
            assert!(at.info_elem(b'(').await);
            assert_eq!(at.scope(), Scope::Elem);
            let stat = at.read_int().await.unwrap();
            let mut name = [0; 8];
            let len = at.read_string(&mut name, false).await.unwrap();
            found.push((stat, String::from_utf8_lossy(&name[..len]).into_owned()));
        }
        assert!(!at.info_elem(b'(').await);
        assert_eq!(at.scope(), Scope::Info);

        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
        found
    });

    assert_eq!(found, [(2, String::from("Op A")), (1, String::from("Op B"))]);
}

#[test]
fn custom_stop_tag_and_delimiter() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+UX: a;b#rest\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UX").await;
        at.cmd_stop().await;
        at.resp_start(Some("+UX:"), false).await;
        at.set_delimiter(b';');
        at.set_stop_tag(Some("#"));

        let mut buf = [0; 4];
        assert_eq!(at.read_string(&mut buf, false).await, Some(1));
        assert_eq!(buf[0], b'a');
        assert_eq!(at.read_string(&mut buf, false).await, Some(1));
        assert_eq!(buf[0], b'b');
        assert_eq!(at.read_string(&mut buf, false).await, None);

        at.set_default_delimiter();
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn stop_tag_longer_than_limit_is_rejected() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+UX: 1\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UX").await;
        at.cmd_stop().await;
        at.resp_start(Some("+UX:"), false).await;
        at.set_stop_tag(Some("TOOLONGTAG"));
        assert_eq!(at.read_int().await, None);
        assert_eq!(at.unlock_return_error(), Err(Error::InvalidParameter));
    });
}

#[test]
fn bounded_and_hex_reads() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+USORD: 0,4,\"41424344\"\r\n\r\nOK\r\n");
    link.reply(b"\r\n+URDBLOCK: 5,hello world\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+USORD=0,4").await;
        at.cmd_stop().await;
        at.resp_start(Some("+USORD:"), false).await;
        at.skip_param(1).await;
        assert_eq!(at.read_int().await, Some(4));
        let mut data = [0; 4];
        assert_eq!(at.read_hex_string(&mut data).await, Some(4));
        assert_eq!(&data, b"ABCD");
        at.resp_stop().await;
        assert_eq!(at.last_error(), Ok(()));

        at.cmd_start("AT+URDBLOCK").await;
        at.cmd_stop().await;
        at.resp_start(Some("+URDBLOCK:"), false).await;
        assert_eq!(at.read_int().await, Some(5));
        let mut data = [0; 5];
        assert_eq!(at.read_bytes(&mut data).await, Some(5));
        assert_eq!(&data, b"hello");
        let mut rest = [0; 16];
        assert_eq!(at.read_bytes(&mut rest).await, Some(6));
        assert_eq!(&rest[..6], b" world");
        assert_eq!(at.read_bytes(&mut rest).await, None);
        at.resp_stop().await;

        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn payload_after_prompt() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n>");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+USOWR=").await;
        at.write_int(0).await;
        at.write_int(3).await;
        at.cmd_stop().await;
        assert!(at.wait_char(b'>').await);

        assert_eq!(at.write_bytes(b"abc").await, 3);
        link.feed(b"\r\n+USOWR: 0,3\r\n\r\nOK\r\n");

        at.resp_start(Some("+USOWR:"), false).await;
        at.skip_param(1).await;
        assert_eq!(at.read_int().await, Some(3));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(link.sent(), "AT+USOWR=0,3\rabc");
}

#[test]
fn write_failure_is_sticky() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.fail_writes(true);
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT").await;
        link.fail_writes(false);
        at.cmd_stop().await;
        assert_eq!(at.write_bytes(b"x").await, 0);
        assert_eq!(at.unlock_return_error(), Err(Error::DeviceError));
    });

    assert_eq!(link.sent(), "");
}

#[test]
fn oversized_prefix_is_rejected() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    let prefix = "+".repeat(40);
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.resp_start(Some(&prefix), false).await;
        assert_eq!(at.unlock_return_error(), Err(Error::InvalidParameter));
    });
}

#[test]
fn sync_retries_until_answered() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"");
    link.reply(b"\r\n+CMEE: 1\r\n\r\nOK\r\n");
    assert!(block_on(client.sync(Duration::from_millis(20))));
    assert_eq!(link.sent(), "AT+CMEE?\rAT+CMEE?\r");

    block_on(async {
        let at = client.lock().await.unwrap();
        assert_eq!(at.at_timeout(), TestConfig::DEFAULT_TIMEOUT);
    });
}

#[test]
fn flush_discards_pending_input() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.feed(b"garbage\r\nmore garbage");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.flush().await;
        at.unlock();
    });

    assert_eq!(link.pending_rx(), 0);
    assert!(!resources.data_ready.signaled());
}

#[test]
fn leftover_input_wakes_urc_runner() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\nOK\r\n\r\n+CREG: 1\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT").await;
        at.cmd_stop_read_resp().await;
        assert_eq!(at.last_error(), Ok(()));
        at.unlock();
    });

    assert!(resources.data_ready.signaled());
}

#[test]
fn urc_runner_drains_between_cycles() {
    static STAT: AtomicI32 = AtomicI32::new(-1);
    static ON_CREG: fn(&mut UrcParams<'_>) = |urc| {
        if let Some(stat) = urc.read_int() {
            STAT.store(stat, Ordering::SeqCst);
        }
    };

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, mut urcs, _) = asynch::new(&state);

    block_on(client.set_urc_handler("+CREG:", &ON_CREG)).unwrap();
    link.feed(b"\r\n+CREG: 2\r\nunexpected line\r\n");

    block_on(join(urcs.run(), async {
        resources.notify_rx(link.pending_rx());
        while STAT.load(Ordering::SeqCst) < 0 {
            Timer::after(Duration::from_millis(5)).await;
        }
        client.deinit().await;
    }));

    assert_eq!(STAT.load(Ordering::SeqCst), 2);
    assert_eq!(link.pending_rx(), 0);
    assert!(!resources.urc_task.is_running());
    assert!(matches!(block_on(client.lock()), Err(Error::NotInitialised)));
    assert_eq!(
        block_on(client.set_urc_handler("+CREG:", &ON_CREG)),
        Err(Error::NotInitialised)
    );
}

#[test]
fn hex_read_filling_buffer_leaves_next_parameter() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+USORD: \"4142\",5\r\n\r\nOK\r\n");
    link.reply(b"\r\n+USORD: 41424344,6\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+USORD=0,2").await;
        at.cmd_stop().await;
        at.resp_start(Some("+USORD:"), false).await;
        let mut data = [0; 2];
        assert_eq!(at.read_hex_string(&mut data).await, Some(2));
        assert_eq!(&data, b"AB");
        assert_eq!(at.read_int().await, Some(5));
        at.resp_stop().await;
        assert_eq!(at.last_error(), Ok(()));

        // Unquoted and longer than the buffer
        at.cmd_start("AT+USORD=0,2").await;
        at.cmd_stop().await;
        at.resp_start(Some("+USORD:"), false).await;
        assert_eq!(at.read_hex_string(&mut data).await, Some(2));
        assert_eq!(&data, b"AB");
        assert_eq!(at.read_int().await, Some(6));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn urc_before_final_result_is_dispatched() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static STAT: AtomicI32 = AtomicI32::new(-1);
    static ON_CREG: fn(&mut UrcParams<'_>) = |urc| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        if let Some(stat) = urc.read_int() {
            STAT.store(stat, Ordering::SeqCst);
        }
    };

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(client.set_urc_handler("+CREG:", &ON_CREG)).unwrap();

    link.reply(b"\r\n+CSQ: 5,99\r\n+CREG: 1\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CSQ").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CSQ:"), false).await;
        assert_eq!(at.read_int().await, Some(5));
        assert_eq!(at.read_int().await, Some(99));
        at.resp_stop().await;
        assert_eq!(at.scope(), Scope::None);
        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(STAT.load(Ordering::SeqCst), 1);
    assert_eq!(link.pending_rx(), 0);
}

#[test]
fn urc_between_information_lines_is_dispatched() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static ON_CREG: fn(&mut UrcParams<'_>) = |_| {
        CALLS.fetch_add(1, Ordering::SeqCst);
    };

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(client.set_urc_handler("+CREG:", &ON_CREG)).unwrap();

    link.reply(b"\r\n+CGDCONT: 1,\"IP\"\r\n+CREG: 1\r\n+CGDCONT: 2,\"IPV6\"\r\n+CREG: 2\r\n\r\nOK\r\n");
    let cids = block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CGDCONT?").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CGDCONT:"), false).await;

        let mut cids = Vec::new();
        while at.info_resp().await {
            cids.push(at.read_int().await.unwrap());
        }

        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
        cids
    });

    assert_eq!(cids, [1, 2]);
    assert_eq!(CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn unrelated_lines_before_final_result_are_skipped() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    link.reply(b"\r\n+UX: 1\r\nnoise, OK?\r\n\r\nOK\r\n");
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UX").await;
        at.cmd_stop().await;
        at.resp_start(Some("+UX:"), false).await;
        assert_eq!(at.read_int().await, Some(1));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(link.pending_rx(), 0);
}

#[test]
fn receive_overrun_is_discarded_and_recovered() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    let mut reply = b"\r\n".to_vec();
    reply.extend_from_slice(&[b'x'; 300]);
    reply.extend_from_slice(b"\r\n+UX: 1\r\n\r\nOK\r\n");
    link.reply(&reply);
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UX").await;
        at.cmd_stop().await;
        at.resp_start(Some("+UX:"), false).await;
        assert_eq!(at.read_int().await, Some(1));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn written_string_reads_back_unquoted() {
    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+UX=").await;
        at.write_string("abc", true).await;
        at.cmd_stop().await;

        let sent = link.sent();
        let param = sent.trim_start_matches("AT+UX=").trim_end_matches('\r');
        assert_eq!(param, "\"abc\"");
        link.feed(format!("\r\n+UX: {param}\r\n\r\nOK\r\n").as_bytes());

        at.resp_start(Some("+UX:"), false).await;
        let mut buf = [0; 8];
        assert_eq!(at.read_string(&mut buf, false).await, Some(3));
        assert_eq!(&buf[..3], b"abc");
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });
}

#[test]
fn long_urc_prefix_raises_token_watermark() {
    struct ShortTokens;

    impl AtConfig for ShortTokens {
        const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
        const MAX_RESP_LENGTH: usize = 8;
    }

    static ON_LOC: fn(&mut UrcParams<'_>) = |_| {};
    static ON_CREG: fn(&mut UrcParams<'_>) = |_| {};

    let link = MockLink::new();
    let resources = Resources::new();
    let state: State<'_, NoopRawMutex, _, ShortTokens, 256> = State::new(link.port(), ShortTokens, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(async {
        assert_eq!(state.engine.lock().await.max_resp_len, 8);

        client.set_urc_handler("+UULOCIND:", &ON_LOC).await.unwrap();
        assert_eq!(state.engine.lock().await.max_resp_len, 10);

        // A shorter prefix never lowers it
        client.set_urc_handler("+CREG:", &ON_CREG).await.unwrap();
        assert_eq!(state.engine.lock().await.max_resp_len, 10);
    });
}

#[test]
fn long_urc_line_is_truncated_for_handler() {
    static SEEN: AtomicUsize = AtomicUsize::new(0);
    static ON_HTTP: fn(&mut UrcParams<'_>) = |urc| {
        SEEN.store(urc.remaining().len(), Ordering::SeqCst);
    };

    let link = MockLink::new();
    let resources = Resources::new();
    let state = test_state(&link, &resources);
    let (client, _, _) = asynch::new(&state);

    block_on(client.set_urc_handler("+UUHTTPCR:", &ON_HTTP)).unwrap();

    let mut reply = b"\r\n+UUHTTPCR: ".to_vec();
    reply.extend_from_slice(&[b'7'; 150]);
    reply.extend_from_slice(b"\r\n\r\n+CSQ: 3,0\r\n\r\nOK\r\n");
    link.reply(&reply);
    block_on(async {
        let mut at = client.lock().await.unwrap();
        at.cmd_start("AT+CSQ").await;
        at.cmd_stop().await;
        at.resp_start(Some("+CSQ:"), false).await;
        assert!(at.urc_matched());
        assert_eq!(at.read_int().await, Some(3));
        at.resp_stop().await;
        assert_eq!(at.unlock_return_error(), Ok(()));
    });

    assert_eq!(SEEN.load(Ordering::SeqCst), URC_LINE_LEN);
}
