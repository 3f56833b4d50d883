//! Request/response client

use std::sync::Arc;

use tokio::time::{timeout_at, Instant};

use super::ack::Acknowledgment;
use super::decoder::{Decoder, PgnMessage};
use super::diagnostic::{Dm30, Dm7Command, ScaledTestResult};
use super::Response;
use crate::bus::{Bus, BusError};
use crate::config::RequestConfig;
use crate::frame::{Frame, DEFAULT_PRIORITY, GLOBAL_ADDRESS};
use crate::pgn;

/// Issues PGN requests and collects the answers
///
/// Every call opens its own reader before sending, so concurrent calls do
/// not interfere. Bus failures are logged and count as a spent attempt;
/// "no answer" is `None` or an empty `Vec`.
pub struct RequestClient {
    bus: Arc<dyn Bus>,
    config: RequestConfig,
}

impl RequestClient {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self::with_config(bus, RequestConfig::default())
    }

    pub fn with_config(bus: Arc<dyn Bus>, config: RequestConfig) -> Self {
        Self { bus, config }
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Request frame for `pgn` addressed to `target` (0xFF for all nodes)
    pub fn request_frame(&self, pgn: u32, target: u8) -> Frame {
        let requested = [
            (pgn & 0xFF) as u8,
            ((pgn >> 8) & 0xFF) as u8,
            ((pgn >> 16) & 0xFF) as u8,
        ];
        Frame::addressed(
            DEFAULT_PRIORITY,
            pgn::REQUEST,
            target,
            self.bus.local_address(),
            requested.to_vec(),
        )
    }

    /// First decodable answer (or acknowledgment) for `T` from `target`
    pub async fn request<T: PgnMessage>(&self, target: u8) -> Option<Response<T>> {
        self.request_with(&Decoder::of(), target, &self.config).await
    }

    pub async fn request_with<T>(
        &self,
        decoder: &Decoder<T>,
        target: u8,
        config: &RequestConfig,
    ) -> Option<Response<T>> {
        let local = self.bus.local_address();
        let request = self.request_frame(decoder.pgn(), target);
        let classify =
            |frame: &Frame| classify(frame, local, target, decoder, decoder.pgn());

        self.run(&request, config, true, &classify)
            .await
            .into_iter()
            .next()
    }

    /// Every decodable answer for `T` within the window, in arrival order
    pub async fn request_multiple<T: PgnMessage>(&self, target: u8) -> Vec<T> {
        self.request_multiple_with(&Decoder::of(), target, &self.config)
            .await
    }

    pub async fn request_multiple_with<T>(
        &self,
        decoder: &Decoder<T>,
        target: u8,
        config: &RequestConfig,
    ) -> Vec<T> {
        let local = self.bus.local_address();
        let request = self.request_frame(decoder.pgn(), target);
        let classify =
            |frame: &Frame| classify(frame, local, target, decoder, decoder.pgn());

        self.run(&request, config, false, &classify)
            .await
            .into_iter()
            .filter_map(Response::data)
            .collect()
    }

    /// Like [`RequestClient::request_multiple`] for an arbitrary PGN, keeping acknowledgments
    pub async fn request_raw(&self, pgn: u32, target: u8) -> Vec<Response<Frame>> {
        let local = self.bus.local_address();
        let decoder = Decoder::raw(pgn);
        let request = self.request_frame(pgn, target);
        let classify = |frame: &Frame| classify(frame, local, target, &decoder, pgn);

        self.run(&request, &self.config, false, &classify).await
    }

    /// Send `command` and wait for the answer selected by `predicate`
    ///
    /// The target is the command's destination; acknowledgments must refer to
    /// the command's PGN.
    pub async fn request_correlated<T>(
        &self,
        command: &Frame,
        decoder: &Decoder<T>,
        predicate: impl Fn(&T) -> bool,
        config: &RequestConfig,
    ) -> Option<Response<T>> {
        let local = self.bus.local_address();
        let target = command.destination();
        let command_pgn = command.pgn();
        let classify = |frame: &Frame| match classify(frame, local, target, decoder, command_pgn)? {
            Response::Data(data) if !predicate(&data) => None,
            response => Some(response),
        };

        self.run(command, config, true, &classify)
            .await
            .into_iter()
            .next()
    }

    /// Run a DM7 test on `target` and return its DM30 result
    pub async fn test_result(
        &self,
        target: u8,
        command: Dm7Command,
    ) -> Option<Response<ScaledTestResult>> {
        let frame = command.to_frame(target, self.bus.local_address());
        let response = self
            .request_correlated(
                &frame,
                &Decoder::<Dm30>::of(),
                |dm30| dm30.find(&command).is_some(),
                &self.config,
            )
            .await?;

        match response {
            Response::Data(dm30) => dm30.find(&command).copied().map(Response::Data),
            Response::Ack(ack) => Some(Response::Ack(ack)),
        }
    }

    /// Attempt loop shared by every request flavour
    async fn run<T, F>(
        &self,
        request: &Frame,
        config: &RequestConfig,
        first_only: bool,
        classify: &F,
    ) -> Vec<Response<T>>
    where
        F: Fn(&Frame) -> Option<Response<T>>,
    {
        let mut attempt = 0;
        let mut busy = 0;

        while attempt < config.attempts {
            let responses = match self.exchange(request, config, first_only, classify).await {
                Ok(responses) => responses,
                Err(e) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, frame = %request, "Request send failed");
                    continue;
                }
            };

            if responses.is_empty() {
                attempt += 1;
                tracing::debug!(attempt, frame = %request, "No response within window");
                continue;
            }

            // Busy replies do not use up attempts
            if responses.iter().all(Response::is_busy) && busy < config.busy_retry_limit {
                busy += 1;
                tracing::debug!(busy, frame = %request, "Responder busy, retrying");
                tokio::time::sleep(config.busy_retry_interval()).await;
                continue;
            }

            return responses;
        }

        tracing::debug!(frame = %request, attempts = config.attempts, "Request unanswered");
        Vec::new()
    }

    /// One send plus one fixed listening window
    async fn exchange<T, F>(
        &self,
        request: &Frame,
        config: &RequestConfig,
        first_only: bool,
        classify: &F,
    ) -> Result<Vec<Response<T>>, BusError>
    where
        F: Fn(&Frame) -> Option<Response<T>>,
    {
        // Listen before sending so a fast responder cannot be missed
        let mut reader = self.bus.read(config.window());
        self.bus.send(request.clone()).await?;
        let deadline = Instant::now() + config.window();

        let mut responses = Vec::new();
        while let Ok(Some(frame)) = timeout_at(deadline, reader.next()).await {
            if let Some(response) = classify(&frame) {
                tracing::trace!(frame = %frame, "Response");
                responses.push(response);
                if first_only {
                    break;
                }
            }
        }
        Ok(responses)
    }
}

/// Match a frame against an outstanding request
fn classify<T>(
    frame: &Frame,
    local: u8,
    target: u8,
    decoder: &Decoder<T>,
    ack_pgn: u32,
) -> Option<Response<T>> {
    if frame.source() == local {
        return None;
    }
    if target != GLOBAL_ADDRESS && frame.source() != target {
        return None;
    }
    let destination = frame.destination();
    if destination != local && destination != GLOBAL_ADDRESS {
        return None;
    }

    if frame.pgn() == pgn::ACKNOWLEDGMENT && decoder.pgn() != pgn::ACKNOWLEDGMENT {
        return Acknowledgment::parse(frame)
            .filter(|ack| ack.pgn == ack_pgn)
            .map(Response::Ack);
    }
    decoder.decode(frame).map(Response::Data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crate::request::AckCode;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TOOL: u8 = 0xF9;
    const ENGINE: u8 = 0x00;
    const HOURS_PGN: u32 = 0xFEE5;

    #[derive(Debug, Clone, PartialEq)]
    struct Hours(u32);

    impl PgnMessage for Hours {
        const PGN: u32 = HOURS_PGN;

        fn decode(frame: &Frame) -> Option<Self> {
            frame.u24_at(0).map(Hours)
        }
    }

    fn hours(source: u8, value: u8) -> Frame {
        Frame::new(6, HOURS_PGN, source, vec![value, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
    }

    fn ack(code: AckCode, pgn: u32) -> Frame {
        Acknowledgment::new(code, pgn, TOOL, ENGINE).to_frame(GLOBAL_ADDRESS)
    }

    /// Answer every request seen by `address` with `respond(index, request)`
    fn spawn_responder<F>(medium: &LoopbackBus, address: u8, respond: F) -> Arc<AtomicUsize>
    where
        F: Fn(usize, &Frame) -> Vec<Frame> + Send + 'static,
    {
        let node = medium.attach(address);
        let mut reader = node.read(Duration::from_secs(3600));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let addressed = frame.destination() == address || frame.destination() == GLOBAL_ADDRESS;
                if frame.pgn() != pgn::REQUEST || frame.source() == address || !addressed {
                    continue;
                }
                let index = seen.fetch_add(1, Ordering::SeqCst);
                for reply in respond(index, &frame) {
                    node.send(reply).await.unwrap();
                }
            }
        });
        count
    }

    fn client(medium: &LoopbackBus) -> RequestClient {
        RequestClient::new(Arc::new(medium.attach(TOOL)))
    }

    #[test]
    fn test_request_frame_layout() {
        let medium = LoopbackBus::new(TOOL);
        let frame = client(&medium).request_frame(0xFEEC, ENGINE);
        assert_eq!(frame.to_string(), "18EA00F9 [3] EC FE 00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_returns_first_match() {
        let medium = LoopbackBus::new(TOOL);
        spawn_responder(&medium, ENGINE, |_, _| vec![hours(ENGINE, 42)]);

        let response = client(&medium).request::<Hours>(ENGINE).await;
        assert_eq!(response, Some(Response::Data(Hours(42))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_is_sent_three_times() {
        let medium = LoopbackBus::new(TOOL);
        let requests = spawn_responder(&medium, ENGINE, |_, _| Vec::new());

        let start = Instant::now();
        let response = client(&medium).request::<Hours>(ENGINE).await;
        let elapsed = start.elapsed();

        assert_eq!(response, None);
        assert_eq!(requests.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(7500));
        assert!(elapsed < Duration::from_millis(7700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_in_third_window() {
        let medium = LoopbackBus::new(TOOL);
        let requests = spawn_responder(&medium, ENGINE, |index, _| {
            if index == 2 {
                vec![hours(ENGINE, 7)]
            } else {
                Vec::new()
            }
        });

        let response = client(&medium).request::<Hours>(ENGINE).await;
        assert_eq!(response, Some(Response::Data(Hours(7))));
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_does_not_use_attempts() {
        let medium = LoopbackBus::new(TOOL);
        let requests = spawn_responder(&medium, ENGINE, |index, _| {
            if index < 4 {
                vec![ack(AckCode::Busy, HOURS_PGN)]
            } else {
                vec![hours(ENGINE, 1)]
            }
        });

        let response = client(&medium).request::<Hours>(ENGINE).await;
        assert_eq!(response, Some(Response::Data(Hours(1))));
        assert_eq!(requests.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_limit_returns_busy() {
        let medium = LoopbackBus::new(TOOL);
        let requests = spawn_responder(&medium, ENGINE, |_, _| vec![ack(AckCode::Busy, HOURS_PGN)]);
        let config = RequestConfig {
            busy_retry_limit: 2,
            ..RequestConfig::default()
        };

        let response = client(&medium)
            .request_with(&Decoder::<Hours>::of(), ENGINE, &config)
            .await
            .unwrap();
        assert!(response.is_busy());
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_window_and_busy_interval() {
        let medium = LoopbackBus::new(TOOL);
        let requests = spawn_responder(&medium, ENGINE, |index, _| {
            if index == 0 {
                vec![ack(AckCode::Busy, HOURS_PGN)]
            } else {
                Vec::new()
            }
        });
        let config = RequestConfig::default()
            .with_window(Duration::from_millis(500))
            .with_busy_retry_interval(Duration::from_millis(50));

        let start = Instant::now();
        let response = client(&medium)
            .request_with(&Decoder::<Hours>::of(), ENGINE, &config)
            .await;
        let elapsed = start.elapsed();

        // One busy pause, then three silent windows
        assert_eq!(response, None);
        assert_eq!(requests.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_millis(1550));
        assert!(elapsed < Duration::from_millis(1700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_is_returned() {
        let medium = LoopbackBus::new(TOOL);
        spawn_responder(&medium, ENGINE, |_, _| vec![ack(AckCode::NegativeAcknowledged, HOURS_PGN)]);

        let response = client(&medium).request::<Hours>(ENGINE).await.unwrap();
        assert_eq!(response.ack().map(|a| a.code), Some(AckCode::NegativeAcknowledged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_foreign_answers() {
        let medium = LoopbackBus::new(TOOL);
        spawn_responder(&medium, ENGINE, |index, _| {
            if index == 0 {
                // None of these answer the tool's request
                vec![
                    hours(0x03, 9),
                    ack(AckCode::NegativeAcknowledged, 0xFEEC),
                    Acknowledgment::new(AckCode::NegativeAcknowledged, HOURS_PGN, 0x22, ENGINE)
                        .to_frame(0x22),
                ]
            } else {
                vec![hours(ENGINE, 5)]
            }
        });

        let response = client(&medium).request::<Hours>(ENGINE).await;
        assert_eq!(response, Some(Response::Data(Hours(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_multiple_global() {
        let medium = LoopbackBus::new(TOOL);
        // One node answers for both so the order on the medium is fixed
        spawn_responder(&medium, ENGINE, |_, _| vec![hours(ENGINE, 1), hours(0x03, 2)]);
        let client = client(&medium);

        let first = client.request_multiple::<Hours>(GLOBAL_ADDRESS).await;
        let second = client.request_multiple::<Hours>(GLOBAL_ADDRESS).await;

        assert_eq!(first, vec![Hours(1), Hours(2)]);
        assert_eq!(second, first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_raw_keeps_acks() {
        let medium = LoopbackBus::new(TOOL);
        spawn_responder(&medium, ENGINE, |_, _| {
            vec![hours(ENGINE, 3), ack(AckCode::AccessDenied, HOURS_PGN)]
        });

        let responses = client(&medium).request_raw(HOURS_PGN, ENGINE).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], Response::Data(hours(ENGINE, 3)));
        assert_eq!(responses[1].ack().map(|a| a.code), Some(AckCode::AccessDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_counts_as_attempt() {
        let medium = LoopbackBus::new(TOOL);
        let client = client(&medium);
        medium.close();

        let start = Instant::now();
        assert_eq!(client.request::<Hours>(ENGINE).await, None);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
