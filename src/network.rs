//! Network/transport parser contract: header build, route check,
//! beacon payload build. An external collaborator, referenced by contract
//! only; the M2NP/M2AdvP/M2QP/M2DP protocols themselves are out of scope.

use crate::auth::AuthContext;
use crate::queue::ByteQueue;
use crate::session::Session;

/// Result of scoring a received frame against the routing/addressing
/// layer. A non-negative score means the frame is addressed to this
/// device.
pub type RouteScore = i16;

/// Network/transport stack contract used by the processing task and the
/// idle-time beacon builder.
pub trait NetworkStack {
    type Error;

    /// Score a received frame on the top session against routing/addressing
    /// rules. Negative means "not for us".
    fn route_score(&mut self, session: &Session) -> Result<RouteScore, Self::Error>;

    /// Build an M2NP header on the top session for an open request,
    /// appending the encoded bytes to `queue`.
    fn build_header(&mut self, session: &mut Session, routing: &[u8], queue: &mut dyn ByteQueue) -> Result<(), Self::Error>;

    /// Finalise the footer of an in-progress request, appending to `queue`.
    fn close_footer(&mut self, session: &mut Session, queue: &mut dyn ByteQueue) -> Result<(), Self::Error>;

    /// Build a fully-formed beacon TX payload for the given channel/params,
    /// using the supplied guest authentication context.
    fn build_beacon_payload(
        &mut self,
        channel: u8,
        params: u8,
        auth: AuthContext,
        out: &mut [u8],
    ) -> Result<usize, Self::Error>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockNetError;

    /// Test double: always addresses the frame to us with a fixed score,
    /// unless configured otherwise.
    pub struct MockNetworkStack {
        pub score: RouteScore,
    }

    impl Default for MockNetworkStack {
        fn default() -> Self {
            Self { score: 0 }
        }
    }

    impl NetworkStack for MockNetworkStack {
        type Error = MockNetError;

        fn route_score(&mut self, _session: &Session) -> Result<RouteScore, Self::Error> {
            Ok(self.score)
        }

        fn build_header(&mut self, _session: &mut Session, routing: &[u8], queue: &mut dyn ByteQueue) -> Result<(), Self::Error> {
            let _ = queue.extend(routing);
            Ok(())
        }

        fn close_footer(&mut self, _session: &mut Session, queue: &mut dyn ByteQueue) -> Result<(), Self::Error> {
            let _ = queue.push(0);
            Ok(())
        }

        fn build_beacon_payload(
            &mut self,
            _channel: u8,
            _params: u8,
            _auth: AuthContext,
            out: &mut [u8],
        ) -> Result<usize, Self::Error> {
            if !out.is_empty() {
                out[0] = 0x40; // broadcast address marker
            }
            Ok(out.len().min(1))
        }
    }
}
