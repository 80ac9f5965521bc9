//! TCP request/reply server
//!
//! One request per connection turn: read a newline-delimited JSON request
//! envelope, process it to completion against the controller, write one
//! reply envelope. All controller operations serialize behind a single lock
//! scoped to the controller instance, so a bus select and its paired
//! transfer can never interleave across requests.
//!
//! Requests are bounded in size and subject to read/write timeouts; replies
//! are not size-bounded (a DAQ spy readout carries megabyte buffers).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use wib_core::Wib;
use wib_error::WibError;
use wib_protocol::{
    Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope, MAX_REQUEST_SIZE,
};

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Read timeout per request
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per reply
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// The controller behind its single serializing lock
pub type SharedWib = Arc<Mutex<Wib>>;

/// Accept and serve connections until ctrl-c
pub async fn serve(listener: TcpListener, wib: SharedWib) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(
        %addr,
        max_conn = MAX_CONNECTIONS,
        max_req = MAX_REQUEST_SIZE,
        "Command server listening"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if ACTIVE_CONNECTIONS.load(Ordering::SeqCst) >= MAX_CONNECTIONS {
                            warn!(%peer, "Connection limit reached, rejecting");
                            drop(stream);
                            continue;
                        }
                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let wib = wib.clone();
                        tokio::spawn(async move {
                            handle_client(stream, peer, wib).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Read one newline-terminated request, refusing oversized messages
async fn read_request_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    buf.clear();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(0);
        }
        let newline = chunk.iter().position(|b| *b == b'\n');
        let take = newline.map(|p| p + 1).unwrap_or(chunk.len());
        if buf.len() + take > MAX_REQUEST_SIZE {
            let consume = take.min(MAX_REQUEST_SIZE);
            reader.consume(consume);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }
        buf.extend_from_slice(&chunk[..take]);
        reader.consume(take);
        if newline.is_some() {
            return Ok(buf.len());
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, wib: SharedWib) {
    debug!(%peer, "Client connected");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(1024);

    loop {
        let read = timeout(READ_TIMEOUT, read_request_line(&mut reader, &mut line)).await;
        let reply = match read {
            Ok(Ok(0)) => {
                debug!(%peer, "Client disconnected");
                break;
            }
            Ok(Ok(_)) => match std::str::from_utf8(&line) {
                Ok(text) => process_request(text, &peer, &wib).await,
                Err(_) => ResponseEnvelope::new(0, Response::error("Invalid request encoding")),
            },
            Ok(Err(e)) => {
                warn!(%peer, "Read error: {}", e);
                let _ = send_reply(
                    &mut writer,
                    &ResponseEnvelope::new(0, Response::error(e.to_string())),
                )
                .await;
                break;
            }
            Err(_) => {
                debug!(%peer, "Read timeout");
                break;
            }
        };
        if send_reply(&mut writer, &reply).await.is_err() {
            break;
        }
    }
}

async fn send_reply(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    reply: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(reply).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });
    let write = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    })
    .await;
    match write {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Parse, validate, and dispatch one request
async fn process_request(line: &str, peer: &SocketAddr, wib: &SharedWib) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!(%peer, "Invalid request: {}", e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!(%peer, "Request validation failed: {}", e);
        return ResponseEnvelope::new(id, Response::error(e));
    }

    let kind = request.type_name();
    debug!(%peer, id, kind, "Processing request");

    // The controller lock is the serialization point: the whole operation,
    // including every nested bus select and transfer, completes before the
    // next request is admitted.
    let response = {
        let mut wib = wib.lock().await;
        dispatch(&mut wib, &request)
    };

    if let Response::Error { ref message } = response {
        warn!(%peer, id, kind, "Request failed: {}", message);
    }
    ResponseEnvelope::new(id, response)
}

fn fail(e: WibError) -> Response {
    Response::error(e.to_string())
}

/// Invoke exactly one controller operation for one request
pub fn dispatch(wib: &mut Wib, request: &Request) -> Response {
    match request {
        Request::GetSensors => match wib.read_sensors() {
            Ok(readings) => Response::ok_sensors(readings),
            Err(e) => fail(e),
        },

        Request::GetTimingStatus => match wib.timing_status() {
            Ok(status) => Response::ok_timing(status),
            Err(e) => fail(e),
        },

        Request::Initialize => {
            info!("AUDIT: Initialize");
            match wib.initialize() {
                Ok(()) => Response::ok(),
                Err(e) => fail(e),
            }
        }

        // The OS-level procedures belong to the deployment tooling; the wire
        // operations exist so operators get an explicit answer.
        Request::Update { .. } => {
            warn!("AUDIT: Update requested");
            fail(WibError::not_supported(
                "firmware update is performed by the deployment tooling",
            ))
        }
        Request::Reboot => {
            warn!("AUDIT: Reboot requested");
            fail(WibError::not_supported(
                "reboot is performed by the deployment tooling",
            ))
        }

        Request::Peek { addr } => match wib.peek(*addr) {
            Ok(value) => Response::ok_reg(*addr, value),
            Err(e) => fail(e),
        },

        Request::Poke { addr, value } => {
            info!("AUDIT: Poke {:#x} = {:#010x}", addr, value);
            match wib.poke(*addr, *value) {
                Ok(()) => Response::ok_reg(*addr, *value),
                Err(e) => fail(e),
            }
        }

        Request::PowerWib { config } => {
            info!("AUDIT: PowerWib fembs={:?} cold={}", config.fembs, config.cold);
            match wib.power_wib(config) {
                Ok(()) => Response::ok(),
                Err(e) => fail(e),
            }
        }

        Request::ConfigureWib { config } => {
            info!("AUDIT: ConfigureWib ({} entries)", config.fembs.len());
            match wib.configure_wib(config) {
                Ok(()) => Response::ok(),
                Err(e) => fail(e),
            }
        }

        Request::SetPulser { on } => {
            info!("AUDIT: SetPulser on={}", on);
            match wib.set_pulser(*on) {
                Ok(()) => Response::ok(),
                Err(e) => fail(e),
            }
        }

        Request::ReadDaqSpy { buf0, buf1 } => match wib.read_daq_spy(*buf0, *buf1) {
            Ok((spy0, spy1)) => Response::Ok(ResponseData::spy(spy0, spy1)),
            Err(e) => fail(e),
        },

        Request::ResetTimingEndpoint => match wib.reset_timing_endpoint() {
            Ok(()) => Response::ok(),
            Err(e) => fail(e),
        },

        Request::SetFakeTime { time } => match wib.set_fake_time(*time) {
            Ok(()) => Response::ok(),
            Err(e) => fail(e),
        },

        Request::StartFakeTime => {
            info!("AUDIT: StartFakeTime");
            match wib.start_fake_time() {
                Ok(()) => Response::ok(),
                Err(e) => fail(e),
            }
        }

        Request::GetFwTimestamp => match wib.read_fw_timestamp() {
            Ok(code) => Response::Ok(ResponseData::timestamp(code)),
            Err(e) => fail(e),
        },

        Request::GetSwTimestamp => Response::Ok(ResponseData::timestamp(wib.read_sw_timestamp())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wib_core::sim::{sim_fabric, SimSpy};
    use wib_core::CryoWib;
    use wib_protocol::{FembConfig, PowerConfig, WibConfig, FEMB_COUNT};

    fn sim_wib() -> Wib {
        let (regs, bus, _log) = sim_fabric();
        Wib::with_parts(
            Box::new(regs),
            Box::new(bus),
            Box::new(SimSpy),
            Box::new(CryoWib),
        )
    }

    fn full_config(enabled: [bool; FEMB_COUNT]) -> WibConfig {
        WibConfig {
            fembs: enabled
                .iter()
                .map(|&e| FembConfig {
                    enabled: e,
                    gain: 1,
                    peak_time: 1,
                    baseline: 0,
                    test_cap: false,
                })
                .collect(),
        }
    }

    fn expect_ok(resp: &Response) -> &ResponseData {
        match resp {
            Response::Ok(data) => data,
            Response::Error { message } => panic!("unexpected error: {}", message),
        }
    }

    fn expect_err(resp: &Response) -> &str {
        match resp {
            Response::Error { message } => message,
            Response::Ok(_) => panic!("expected an error response"),
        }
    }

    #[test]
    fn get_sensors_returns_every_channel() {
        let mut wib = sim_wib();
        let resp = dispatch(&mut wib, &Request::GetSensors);
        let data = expect_ok(&resp);
        assert_eq!(data.sensors.as_ref().unwrap().len(), 29);
    }

    #[test]
    fn configure_before_power_is_rejected() {
        let mut wib = sim_wib();
        let resp = dispatch(
            &mut wib,
            &Request::ConfigureWib {
                config: full_config([true, false, false, false]),
            },
        );
        let msg = expect_err(&resp);
        assert!(msg.contains("must be powered"), "got: {}", msg);
        assert!(!wib.femb_powered(0));
    }

    #[test]
    fn wrong_module_count_is_rejected_without_state_change() {
        let mut wib = sim_wib();
        let mut config = full_config([false; FEMB_COUNT]);
        config.fembs.truncate(3);
        let resp = dispatch(&mut wib, &Request::ConfigureWib { config });
        let msg = expect_err(&resp);
        assert!(msg.contains("exactly 4"), "got: {}", msg);
        for i in 0..FEMB_COUNT {
            assert!(!wib.femb_powered(i));
        }
    }

    #[test]
    fn power_then_configure_then_power_off() {
        let mut wib = sim_wib();

        let resp = dispatch(
            &mut wib,
            &Request::PowerWib {
                config: PowerConfig {
                    fembs: [true, false, false, false],
                    cold: false,
                },
            },
        );
        expect_ok(&resp);
        assert!(wib.femb_powered(0));

        let resp = dispatch(
            &mut wib,
            &Request::ConfigureWib {
                config: full_config([true, false, false, false]),
            },
        );
        expect_ok(&resp);
        assert!(wib.femb_configured(0));

        let resp = dispatch(
            &mut wib,
            &Request::PowerWib {
                config: PowerConfig {
                    fembs: [false; FEMB_COUNT],
                    cold: false,
                },
            },
        );
        expect_ok(&resp);
        assert!(!wib.femb_powered(0));
        assert!(!wib.femb_configured(0));
    }

    #[test]
    fn peek_poke_round_trip_over_the_wire_shapes() {
        let mut wib = sim_wib();
        let addr = 0xA00C_0020u64;

        let json = format!(
            r#"{{"id": 7, "cmd": "Poke", "data": {{"addr": {}, "value": 3735928559}}}}"#,
            addr
        );
        let envelope: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope.id, 7);
        envelope.request.validate().unwrap();
        let resp = dispatch(&mut wib, &envelope.request);
        expect_ok(&resp);

        let resp = dispatch(&mut wib, &Request::Peek { addr });
        let data = expect_ok(&resp);
        assert_eq!(data.value, Some(0xDEAD_BEEF));
        assert_eq!(data.addr, Some(addr));

        // Reply envelope serializes with the status tag
        let wire = serde_json::to_string(&ResponseEnvelope::new(7, resp)).unwrap();
        assert!(wire.contains(r#""status":"ok""#));
    }

    #[test]
    fn misaligned_peek_fails_validation() {
        let req = Request::Peek { addr: 0xA00C_0001 };
        assert!(req.validate().is_err());
    }

    #[test]
    fn reboot_and_update_report_not_supported() {
        let mut wib = sim_wib();
        let msg = expect_err(&dispatch(&mut wib, &Request::Reboot)).to_string();
        assert!(msg.contains("not supported"), "got: {}", msg);
        let msg = expect_err(&dispatch(
            &mut wib,
            &Request::Update {
                root_archive: "root.tar".into(),
                boot_archive: "boot.tar".into(),
            },
        ))
        .to_string();
        assert!(msg.contains("not supported"), "got: {}", msg);
    }

    #[test]
    fn fake_time_is_armed_then_fired() {
        let mut wib = sim_wib();
        expect_ok(&dispatch(&mut wib, &Request::SetFakeTime { time: 42 }));
        expect_ok(&dispatch(&mut wib, &Request::StartFakeTime));
    }

    #[test]
    fn daq_spy_reply_carries_requested_buffers_only() {
        let mut wib = sim_wib();
        let resp = dispatch(&mut wib, &Request::ReadDaqSpy { buf0: false, buf1: true });
        let data = expect_ok(&resp);
        assert!(data.spy0.is_none());
        assert!(data.spy1.is_some());
    }

    #[test]
    fn timestamps_are_reported() {
        let mut wib = sim_wib();
        let data_fw = dispatch(&mut wib, &Request::GetFwTimestamp);
        assert_eq!(expect_ok(&data_fw).value, Some(0x1234_5678));
        let data_sw = dispatch(&mut wib, &Request::GetSwTimestamp);
        assert!(expect_ok(&data_sw).value.is_some());
    }
}
