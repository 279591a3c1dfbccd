//! Object search over the token's find cursor

use tracing::debug;

use crate::error::{KeyManagementError, StoreResult};
use crate::model::{SlotId, NUM_SLOTS};
use crate::ports::{attribute_bytes, Attribute, AttributeKind, TokenInterface, TokenResult};

/// Every object matching `template`.
///
/// Pages through the cursor until the token reports no more objects; the
/// cursor is always closed, even when a page fails.
pub(super) fn find_all<T: TokenInterface>(
    token: &T,
    session: T::Session,
    template: &[Attribute],
) -> TokenResult<Vec<T::Object>> {
    token.find_objects_init(session, template)?;

    let mut found = Vec::new();
    let drained = drain(token, session, &mut found);
    let finished = token.find_objects_final(session);

    drained?;
    finished?;
    Ok(found)
}

/// Like [`find_all`], but keeps whatever was found before a page fails.
///
/// Starting and closing the search still have to succeed.
pub(super) fn find_all_lenient<T: TokenInterface>(
    token: &T,
    session: T::Session,
    template: &[Attribute],
) -> TokenResult<Vec<T::Object>> {
    token.find_objects_init(session, template)?;

    let mut found = Vec::new();
    if let Err(e) = drain(token, session, &mut found) {
        debug!("Failed to find objects after {}: {}", found.len(), e);
    }
    token.find_objects_final(session)?;
    Ok(found)
}

fn drain<T: TokenInterface>(
    token: &T,
    session: T::Session,
    found: &mut Vec<T::Object>,
) -> TokenResult<()> {
    loop {
        let page = token.find_objects(session, NUM_SLOTS)?;
        if page.is_empty() {
            return Ok(());
        }
        found.extend(page);
    }
}

/// The single object matching `template`.
pub(super) fn find_one<T: TokenInterface>(
    token: &T,
    session: T::Session,
    template: &[Attribute],
    object: &str,
    slot: SlotId,
) -> StoreResult<T::Object> {
    let mut found = find_all(token, session, template)?;
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(KeyManagementError::ObjectNotFound {
            object: object.to_string(),
            slot: slot.to_string(),
        }
        .into()),
        count => Err(KeyManagementError::AmbiguousObject {
            object: object.to_string(),
            slot: slot.to_string(),
            count,
        }
        .into()),
    }
}

/// Bytes of one attribute of `object`, `None` when the token has none.
pub(super) fn read_bytes<T: TokenInterface>(
    token: &T,
    session: T::Session,
    object: T::Object,
    kind: AttributeKind,
) -> TokenResult<Option<Vec<u8>>> {
    let attrs = token.attributes(session, object, &[kind])?;
    Ok(attribute_bytes(&attrs, kind).map(<[u8]>::to_vec))
}
