use std::time::Duration;

use crate::channel::Channel;
use crate::framing::encode_encrypted;
use crate::{ChannelState, Error, HandshakeStatus, Transport};

/// Run one tick of the handshake.
///
/// Advances the session, sends whatever handshake datagrams it produced and
/// moves the channel to `Encrypted` once the session reports completion.
/// Sends are fire and forget, the session retransmits on its own timers.
pub(crate) fn advance<T: Transport>(channel: &mut Channel, transport: &mut T, now: Duration) {
    if channel.state() != ChannelState::Handshaking {
        return;
    }

    let Some(session) = channel.session_mut() else {
        return;
    };

    let outcome: Result<(), Error> = if session.is_handshake_complete() {
        Ok(())
    } else {
        match session.advance_handshake(now) {
            Ok(HandshakeStatus::Complete) => Ok(()),
            Ok(HandshakeStatus::WouldBlock(want)) => {
                trace!("Handshake would block: {:?}", want);
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = outcome {
        channel.fail(&e);
        return;
    }

    let Some(session) = channel.session_mut() else {
        return;
    };

    let mut sent = 0;
    for datagram in session.drain_pending_output() {
        if datagram.is_empty() {
            continue;
        }
        transport.send_unreliable(encode_encrypted(true, &datagram));
        sent += 1;
    }

    if sent > 0 {
        trace!("Sent {} handshake datagrams", sent);
    }

    if session.is_handshake_complete() {
        channel.complete();
    }
}
