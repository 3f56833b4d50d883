//! Simulated ECU task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use j1939::pgn;
use j1939::request::Dm30;
use j1939::{
    AckCode, Acknowledgment, Bus, Dm7Command, Frame, LoopbackBus, RecordedWarnings, StackConfig,
    TransportProtocolBus, GLOBAL_ADDRESS,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ResponseDef, SimConfig};

const READ_WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Counters {
    requests: HashMap<u32, u32>,
    commands: u32,
}

/// An ECU attached to a loop-back medium
///
/// Answers requests and DM7 commands according to its [`SimConfig`]. Replies
/// longer than 8 bytes go out through its own Transport Protocol bus.
pub struct SimulatedEcu {
    name: String,
    bus: Arc<TransportProtocolBus>,
    warnings: Arc<RecordedWarnings>,
    counters: Arc<Mutex<Counters>>,
    task: JoinHandle<()>,
}

impl SimulatedEcu {
    /// Attach to `medium` and start answering. Must be called inside a tokio runtime.
    pub fn start(medium: &LoopbackBus, config: SimConfig) -> Self {
        Self::start_with(medium, config, &StackConfig::default())
    }

    pub fn start_with(medium: &LoopbackBus, config: SimConfig, stack: &StackConfig) -> Self {
        let warnings = Arc::new(RecordedWarnings::new());
        let bus = Arc::new(TransportProtocolBus::with_settings(
            Arc::new(medium.attach(config.address)),
            stack.transport.clone(),
            warnings.clone(),
        ));
        let counters = Arc::new(Mutex::new(Counters::default()));

        info!(
            name = %config.name,
            address = config.address,
            responses = config.responses.len(),
            tests = config.tests.len(),
            "Simulated ECU started"
        );

        let responder = Responder {
            bus: bus.clone(),
            counters: counters.clone(),
            config,
        };
        // Open the reader here so a request sent right after start is seen
        let reader = bus.read(READ_WINDOW);
        let name = responder.config.name.clone();
        let task = tokio::spawn(responder.run(reader));

        Self {
            name,
            bus,
            warnings,
            counters,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u8 {
        self.bus.local_address()
    }

    /// The ECU's own Transport Protocol bus
    pub fn bus(&self) -> &Arc<TransportProtocolBus> {
        &self.bus
    }

    /// Protocol warnings the ECU's TP bus reported
    pub fn warnings(&self) -> &RecordedWarnings {
        &self.warnings
    }

    /// Requests received for `pgn`, answered or not
    pub fn requests_seen(&self, pgn: u32) -> u32 {
        self.counters.lock().requests.get(&pgn).copied().unwrap_or(0)
    }

    pub fn commands_seen(&self) -> u32 {
        self.counters.lock().commands
    }

    /// Stop answering. The shared medium stays open.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SimulatedEcu {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Responder {
    bus: Arc<TransportProtocolBus>,
    counters: Arc<Mutex<Counters>>,
    config: SimConfig,
}

impl Responder {
    async fn run(self, mut reader: j1939::BusReader) {
        let responder = Arc::new(self);
        let local = responder.config.address;

        loop {
            let frame = match reader.next().await {
                Some(frame) => frame,
                None if reader.is_closed() => break,
                None => continue,
            };
            if frame.source() == local {
                continue;
            }
            let destination = frame.destination();
            if destination != local && destination != GLOBAL_ADDRESS {
                continue;
            }

            let (replies, delay) = match frame.pgn() {
                pgn::REQUEST => responder.on_request(&frame),
                pgn::DM7 if destination == local => (responder.on_command(&frame), Duration::ZERO),
                _ => continue,
            };

            // TP replies wait on flow control, keep reading meanwhile
            let sender = responder.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for reply in replies {
                    if let Err(e) = sender.bus.send(reply).await {
                        warn!(name = %sender.config.name, error = %e, "Failed to send reply");
                    }
                }
            });
        }
        debug!(name = %responder.config.name, "Simulated ECU stopped");
    }

    /// Replies to a request and how long to hold them back
    fn on_request(&self, request: &Frame) -> (Vec<Frame>, Duration) {
        let Some(requested) = request.u24_at(0) else {
            return (Vec::new(), Duration::ZERO);
        };
        let requester = request.source();
        let seen = {
            let mut counters = self.counters.lock();
            let seen = counters.requests.entry(requested).or_insert(0);
            *seen += 1;
            *seen
        };
        debug!(
            name = %self.config.name,
            pgn = requested,
            requester,
            seen,
            "Request received"
        );

        let Some(response) = self.config.response(requested) else {
            // Only a request addressed to this node earns a NACK
            if request.destination() == self.config.address {
                let nack = self.ack(AckCode::NegativeAcknowledged, requested, requester);
                return (vec![nack], Duration::ZERO);
            }
            return (Vec::new(), Duration::ZERO);
        };

        (self.answer(response, seen, requester), response.delay())
    }

    fn answer(&self, response: &ResponseDef, seen: u32, requester: u8) -> Vec<Frame> {
        if seen <= response.silent_requests {
            return Vec::new();
        }
        let answered = seen - response.silent_requests;
        if answered <= response.busy_replies {
            return vec![self.ack(AckCode::Busy, response.pgn, requester)];
        }
        if let Some(ack) = response.ack {
            return vec![self.ack(ack.into(), response.pgn, requester)];
        }

        match response.payload() {
            Ok(payload) => vec![Frame::addressed(
                6,
                response.pgn,
                requester,
                self.config.address,
                payload,
            )],
            Err(e) => {
                warn!(name = %self.config.name, error = %e, "Unusable response payload");
                Vec::new()
            }
        }
    }

    fn on_command(&self, frame: &Frame) -> Vec<Frame> {
        let Some(command) = Dm7Command::parse(frame) else {
            return Vec::new();
        };
        self.counters.lock().commands += 1;
        let requester = frame.source();

        let results: Vec<_> = self
            .config
            .tests
            .iter()
            .filter(|t| t.test_id == command.test_id && t.spn == command.spn)
            .map(j1939::ScaledTestResult::from)
            .collect();
        debug!(
            name = %self.config.name,
            test_id = command.test_id,
            spn = command.spn,
            results = results.len(),
            "DM7 received"
        );

        if results.is_empty() {
            return vec![self.ack(AckCode::NegativeAcknowledged, pgn::DM7, requester)];
        }
        vec![Dm30 { results }.to_frame(requester, self.config.address)]
    }

    fn ack(&self, code: AckCode, pgn: u32, requester: u8) -> Frame {
        Acknowledgment::new(code, pgn, requester, self.config.address).to_frame(GLOBAL_ADDRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use j1939::{RequestClient, Response};
    use pretty_assertions::assert_eq;

    const TOOL: u8 = 0xF9;

    fn client(medium: &LoopbackBus) -> RequestClient {
        let bus = TransportProtocolBus::new(Arc::new(medium.attach(TOOL)));
        RequestClient::new(Arc::new(bus))
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_single_frame_request() {
        let medium = LoopbackBus::new(TOOL);
        let config = SimConfig::default().with_response(ResponseDef::data(0xFEE5, &[1, 2, 3, 4, 5, 6, 7, 8]));
        let ecu = SimulatedEcu::start(&medium, config);

        let responses = client(&medium).request_raw(0xFEE5, 0x00).await;
        assert_eq!(responses.len(), 1);
        let frame = responses[0].clone().data().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(ecu.requests_seen(0xFEE5), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_through_transport_protocol() {
        let medium = LoopbackBus::new(TOOL);
        let vin = b"1HGBH41JXMN109186*".to_vec();
        let config = SimConfig::default().with_response(ResponseDef::data(0xFEEC, &vin));
        let _ecu = SimulatedEcu::start(&medium, config);

        let responses = client(&medium).request_raw(0xFEEC, 0x00).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].clone().data().unwrap().data(), vin.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pgn_is_nacked() {
        let medium = LoopbackBus::new(TOOL);
        let _ecu = SimulatedEcu::start(&medium, SimConfig::default());

        let responses = client(&medium).request_raw(0xFECA, 0x00).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0].ack().map(|a| a.code),
            Some(AckCode::NegativeAcknowledged)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dm7_answered_with_dm30() {
        let medium = LoopbackBus::new(TOOL);
        let config = SimConfig::default().with_test(crate::config::TestResultDef {
            test_id: 12,
            spn: 102,
            fmi: 0x1F,
            slot: 0,
            value: 1200,
            max: 2000,
            min: 0,
        });
        let ecu = SimulatedEcu::start(&medium, config);

        let response = client(&medium)
            .test_result(0x00, Dm7Command::new(12, 102))
            .await;
        match response {
            Some(Response::Data(result)) => assert_eq!(result.value, 1200),
            other => panic!("Expected DM30 result, got {:?}", other),
        }
        assert_eq!(ecu.commands_seen(), 1);
    }
}
