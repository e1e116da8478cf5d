//! Secondary response handling.
//!
//! A 2xx (or other late) response whose to-tag hasn't been seen before,
//! arriving on a transaction already past `invite_proceeding`, can't be
//! folded into whichever dialog this transaction already committed to --
//! RFC 3261 forked-INVITE behaviour means a second (or third) 2xx can
//! arrive from a sibling branch after the first already won. Left alone
//! this leaks a dialog leg on the far end. The fix is mechanical: ACK it,
//! then immediately BYE it, off to the side, never blocking the `Call`
//! task that found it.

use rvoip_sip_core::prelude::*;
use tracing::warn;

use crate::call::Call;
use crate::transaction::TransactionId;

/// Spawn the detached ACK+BYE cleanup task for a late/secondary response.
/// Fire-and-forget: failures are logged, never reported back to the owning
/// `Call`.
pub fn spawn(call: &mut Call, uac_id: TransactionId, response: Response) {
    let Some(tx) = call.transactions.get(&uac_id) else { return };
    let original = tx.request.clone();
    let call_id = call.call_id.clone();
    let transport = call.collabs.transport.clone();
    let to_tag = response.to().and_then(|t| t.tag()).map(|t| t.to_string());
    let dest = crate::transaction::uac::destination_of(&original);

    tokio::spawn(async move {
        let ack = build_ack(&original, &response);
        if let Err(e) = transport.send_request(&ack, dest).await {
            warn!(call_id = %call_id, tx_id = %uac_id, ?to_tag, error = %e, "secondary-response ack failed, abandoning cleanup");
            return;
        }

        let bye = build_bye(&original, &response);
        if let Err(e) = transport.send_request(&bye, dest).await {
            warn!(call_id = %call_id, tx_id = %uac_id, ?to_tag, error = %e, "secondary-response bye failed");
        }
    });
}

/// ACK a dialog-establishing response (RFC 3261 §13.2.2.4): reuses the
/// original INVITE's Call-ID/From/top-Via/CSeq-number, takes To from the
/// response.
fn build_ack(original: &Request, resp: &Response) -> Request {
    let mut ack = original.clone();
    ack.method = Method::Ack;
    ack.body = bytes::Bytes::new();
    if let Some(to) = resp.to() {
        ack.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        ack.headers.push(TypedHeader::To(to.clone()));
    }
    if let Some(cseq) = original.cseq() {
        ack.headers.retain(|h| !matches!(h, TypedHeader::CSeq(_)));
        ack.headers.push(TypedHeader::CSeq(rvoip_sip_core::types::CSeq::new(cseq.seq, Method::Ack)));
    }
    ack
}

/// Build the BYE that immediately tears the leaked dialog back down. CSeq
/// advances by one past the ACK, which per RFC 3261 doesn't consume a
/// sequence number of its own.
fn build_bye(original: &Request, resp: &Response) -> Request {
    let mut bye = original.clone();
    bye.method = Method::Bye;
    bye.body = bytes::Bytes::new();
    if let Some(to) = resp.to() {
        bye.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        bye.headers.push(TypedHeader::To(to.clone()));
    }
    if let Some(cseq) = original.cseq() {
        bye.headers.retain(|h| !matches!(h, TypedHeader::CSeq(_)));
        bye.headers.push(TypedHeader::CSeq(rvoip_sip_core::types::CSeq::new(cseq.seq + 1, Method::Bye)));
    }
    bye
}
