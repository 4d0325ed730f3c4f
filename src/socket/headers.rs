//! Header tokens of the client protocol.
//!
//! Grouped by direction. Argument 0 of every context-scoped message is the
//! decimal input context id.

// ─── Client → broker requests ──────────────────────────────────────────────

/// Allocate a new input context. Reply: [`IMCONTEXT_REGISTERED`].
pub const REGISTER_IMCONTEXT: &str = "register_imcontext";
/// Destroy an input context. Reply: [`IMCONTEXT_DEREGISTERED`].
pub const DEREGISTER_IMCONTEXT: &str = "deregister_imcontext";
/// Reset the engine session. Reply: [`IMCONTEXT_RESETED`].
pub const RESET_IMCONTEXT: &str = "reset_imcontext";
/// Enable composition. Reply: [`IMCONTEXT_ENABLED`].
pub const ENABLE_IMCONTEXT: &str = "enable_imcontext";
/// Disable composition. Reply: [`IMCONTEXT_DISABLED`].
pub const DISABLE_IMCONTEXT: &str = "disable_imcontext";
/// Focus in (default) or out. Reply: [`FOCUS_CHANGED`].
pub const CHANGE_FOCUS: &str = "change_focus";
/// Filter a key event. Reply: [`KEY_EVENT_HANDLED`].
pub const HANDLE_KEY_EVENT: &str = "handle_key_event";
/// Update on-screen cursor coordinates. Reply: [`CURSOR_LOCATION_CHANGED`].
pub const SET_CURSOR_LOCATION: &str = "set_cursor_location";
/// Change where the preedit is rendered. Reply: [`PREEDIT_MODE_CHANGED`].
pub const SET_PREEDIT_MODE: &str = "set_preedit_mode";

// ─── Broker → client replies ───────────────────────────────────────────────

/// Reply to [`REGISTER_IMCONTEXT`] carrying the new id.
pub const IMCONTEXT_REGISTERED: &str = "imcontext_registered";
/// Reply to [`DEREGISTER_IMCONTEXT`].
pub const IMCONTEXT_DEREGISTERED: &str = "imcontext_deregistered";
/// Reply to [`RESET_IMCONTEXT`].
pub const IMCONTEXT_RESETED: &str = "imcontext_reseted";
/// Reply to [`ENABLE_IMCONTEXT`].
pub const IMCONTEXT_ENABLED: &str = "imcontext_enabled";
/// Reply to [`DISABLE_IMCONTEXT`].
pub const IMCONTEXT_DISABLED: &str = "imcontext_disabled";
/// Reply to [`CHANGE_FOCUS`].
pub const FOCUS_CHANGED: &str = "focus_changed";
/// Reply to [`HANDLE_KEY_EVENT`] carrying the consumed flag.
pub const KEY_EVENT_HANDLED: &str = "key_event_handled";
/// Reply to [`SET_CURSOR_LOCATION`].
pub const CURSOR_LOCATION_CHANGED: &str = "cursor_location_changed";
/// Reply to [`SET_PREEDIT_MODE`].
pub const PREEDIT_MODE_CHANGED: &str = "preedit_mode_changed";

// ─── Broker → client notifications ─────────────────────────────────────────

/// Show or hide the client-rendered preedit.
pub const SET_PREEDIT_SHOWN: &str = "set_preedit_shown";
/// Replace the client-rendered preedit text.
pub const SET_PREEDIT_STRING: &str = "set_preedit_string";
/// Move the caret inside the client-rendered preedit.
pub const SET_PREEDIT_CURSOR_POSITION: &str = "set_preedit_cursor_position";
/// Replace the preedit style ranges.
pub const SET_PREEDIT_ATTRIBUTES: &str = "set_preedit_attributes";
/// Ask the client to redraw its preedit. Acknowledged by [`PREEDIT_UPDATED`].
pub const UPDATE_PREEDIT: &str = "update_preedit";
/// Insert committed text.
pub const COMMIT_STRING: &str = "commit_string";
/// Hand a key event back to the client unprocessed.
pub const FORWARD_KEY_EVENT: &str = "forward_key_event";
/// Ring the bell.
pub const BEEP: &str = "beep";
/// The enablement of the context changed.
pub const IMENGINE_STATUS_CHANGED: &str = "imengine_status_changed";

// ─── Round-trip requests and their acknowledgements ────────────────────────

/// Ask for text around the caret.
pub const GET_SURROUNDING_TEXT: &str = "get_surrounding_text";
/// Delete text around the caret.
pub const DELETE_SURROUNDING_TEXT: &str = "delete_surrounding_text";
/// Replace the text around the caret.
pub const REPLACE_SURROUNDING_TEXT: &str = "replace_surrounding_text";
/// Answer to [`GET_SURROUNDING_TEXT`].
pub const SURROUNDING_TEXT_GOTTEN: &str = "surrounding_text_gotten";
/// Answer to [`DELETE_SURROUNDING_TEXT`].
pub const SURROUNDING_TEXT_DELETED: &str = "surrounding_text_deleted";
/// Answer to [`REPLACE_SURROUNDING_TEXT`].
pub const SURROUNDING_TEXT_REPLACED: &str = "surrounding_text_replaced";

// ─── Passive acknowledgements ──────────────────────────────────────────────

/// The client finished redrawing its preedit.
pub const PREEDIT_UPDATED: &str = "preedit_updated";
/// Ack of [`COMMIT_STRING`].
pub const STRING_COMMITED: &str = "string_commited";
/// Ack of [`FORWARD_KEY_EVENT`].
pub const KEY_EVENT_FORWARDED: &str = "key_event_forwarded";
/// Ack of [`BEEP`].
pub const BEEPED: &str = "beeped";

/// Encode a boolean argument.
pub fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Parse a boolean argument.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "true" | "TRUE" | "1" => Some(true),
        "false" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_round_trip() {
        assert_eq!(parse_flag(flag(true)), Some(true));
        assert_eq!(parse_flag(flag(false)), Some(false));
        assert_eq!(parse_flag("yes"), None);
    }
}
