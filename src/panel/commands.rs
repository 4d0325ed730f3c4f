//! Panel command opcodes.
//!
//! Opcodes are shared with the other front-ends of the platform, so the
//! numbers are fixed. Commands the broker sends live in the 100s, commands
//! the panel sends live in the 200s.

/// Opens a broker → panel batch: `REQUEST U32(context)`.
pub const REQUEST: u32 = 1;
/// Generic acknowledgement.
pub const REPLY: u32 = 2;

// ─── Broker → panel ────────────────────────────────────────────────────────

/// Announce a context: `U32(client) U32(context)`.
pub const REGISTER_INPUT_CONTEXT: u32 = 100;
/// Forget a context.
pub const REMOVE_INPUT_CONTEXT: u32 = 101;
/// A context gained focus: `Str(provider uuid)`.
pub const FOCUS_IN: u32 = 102;
/// A context lost focus.
pub const FOCUS_OUT: u32 = 103;
/// Composition enabled.
pub const TURN_ON: u32 = 104;
/// Composition disabled.
pub const TURN_OFF: u32 = 105;
/// Provider info: `Str(uuid) Str(name) Str(language) Str(icon)`.
pub const UPDATE_FACTORY_INFO: u32 = 106;
/// Caret coordinates: `I32(x) I32(y)`.
pub const UPDATE_SPOT_LOCATION: u32 = 107;
/// Show the panel preedit.
pub const SHOW_PREEDIT_STRING: u32 = 110;
/// Hide the panel preedit.
pub const HIDE_PREEDIT_STRING: u32 = 111;
/// Preedit content: `Str(text) Attrs(attrs)`.
pub const UPDATE_PREEDIT_STRING: u32 = 112;
/// Preedit caret: `U32(pos)`.
pub const UPDATE_PREEDIT_CARET: u32 = 113;
/// Show the aux string.
pub const SHOW_AUX_STRING: u32 = 114;
/// Hide the aux string.
pub const HIDE_AUX_STRING: u32 = 115;
/// Aux content: `Str(text) Attrs(attrs)`.
pub const UPDATE_AUX_STRING: u32 = 116;
/// Show the candidate table.
pub const SHOW_LOOKUP_TABLE: u32 = 117;
/// Hide the candidate table.
pub const HIDE_LOOKUP_TABLE: u32 = 118;
/// Candidate table content: `Table(table)`.
pub const UPDATE_LOOKUP_TABLE: u32 = 119;
/// Toolbar properties: `Props(list)`.
pub const REGISTER_PROPERTIES: u32 = 120;
/// One toolbar property: `Prop(property)`.
pub const UPDATE_PROPERTY: u32 = 121;
/// Start a helper: `Str(uuid)`.
pub const START_HELPER: u32 = 122;
/// Stop a helper: `Str(uuid)`.
pub const STOP_HELPER: u32 = 123;
/// Event for a helper: `Str(uuid) Nested(payload)`.
pub const SEND_HELPER_EVENT: u32 = 124;
/// Help text: `Str(text)`.
pub const SHOW_HELP: u32 = 125;
/// Provider menu: `StrList(uuid, name, language, icon, ...)`.
pub const SHOW_FACTORY_MENU: u32 = 126;

// ─── Panel → broker ────────────────────────────────────────────────────────

/// Reload configuration (global, no context).
pub const RELOAD_CONFIG: u32 = 200;
/// Exit request (global, no context).
pub const EXIT: u32 = 201;
/// Previous candidate page.
pub const LOOKUP_TABLE_PAGE_UP: u32 = 210;
/// Next candidate page.
pub const LOOKUP_TABLE_PAGE_DOWN: u32 = 211;
/// Candidates per page: `U32(size)`.
pub const UPDATE_LOOKUP_TABLE_PAGE_SIZE: u32 = 212;
/// Candidate picked: `U32(index)`.
pub const SELECT_CANDIDATE: u32 = 213;
/// Preedit caret moved: `U32(pos)`.
pub const MOVE_PREEDIT_CARET: u32 = 214;
/// Toolbar property clicked: `Str(key)`.
pub const TRIGGER_PROPERTY: u32 = 215;
/// Helper event: `Str(uuid) Nested(payload)`.
pub const PROCESS_HELPER_EVENT: u32 = 216;
/// Key injected by the panel: `Key(event)`.
pub const PROCESS_KEY_EVENT: u32 = 217;
/// Text entered on the panel: `Str(text)`.
pub const COMMIT_STRING: u32 = 218;
/// Help requested.
pub const REQUEST_HELP: u32 = 219;
/// Provider menu requested.
pub const REQUEST_FACTORY_MENU: u32 = 220;
/// Provider picked: `Str(uuid)`.
pub const CHANGE_FACTORY: u32 = 221;

/// Whether a panel → broker command is addressed to one context.
pub fn is_per_context(cmd: u32) -> bool {
    (LOOKUP_TABLE_PAGE_UP..=CHANGE_FACTORY).contains(&cmd)
}

/// Human-readable opcode name for logs.
pub fn name(cmd: u32) -> &'static str {
    match cmd {
        REQUEST => "request",
        REPLY => "reply",
        REGISTER_INPUT_CONTEXT => "register_input_context",
        REMOVE_INPUT_CONTEXT => "remove_input_context",
        FOCUS_IN => "focus_in",
        FOCUS_OUT => "focus_out",
        TURN_ON => "turn_on",
        TURN_OFF => "turn_off",
        UPDATE_FACTORY_INFO => "update_factory_info",
        UPDATE_SPOT_LOCATION => "update_spot_location",
        SHOW_PREEDIT_STRING => "show_preedit_string",
        HIDE_PREEDIT_STRING => "hide_preedit_string",
        UPDATE_PREEDIT_STRING => "update_preedit_string",
        UPDATE_PREEDIT_CARET => "update_preedit_caret",
        SHOW_AUX_STRING => "show_aux_string",
        HIDE_AUX_STRING => "hide_aux_string",
        UPDATE_AUX_STRING => "update_aux_string",
        SHOW_LOOKUP_TABLE => "show_lookup_table",
        HIDE_LOOKUP_TABLE => "hide_lookup_table",
        UPDATE_LOOKUP_TABLE => "update_lookup_table",
        REGISTER_PROPERTIES => "register_properties",
        UPDATE_PROPERTY => "update_property",
        START_HELPER => "start_helper",
        STOP_HELPER => "stop_helper",
        SEND_HELPER_EVENT => "send_helper_event",
        SHOW_HELP => "show_help",
        SHOW_FACTORY_MENU => "show_factory_menu",
        RELOAD_CONFIG => "reload_config",
        EXIT => "exit",
        LOOKUP_TABLE_PAGE_UP => "lookup_table_page_up",
        LOOKUP_TABLE_PAGE_DOWN => "lookup_table_page_down",
        UPDATE_LOOKUP_TABLE_PAGE_SIZE => "update_lookup_table_page_size",
        SELECT_CANDIDATE => "select_candidate",
        MOVE_PREEDIT_CARET => "move_preedit_caret",
        TRIGGER_PROPERTY => "trigger_property",
        PROCESS_HELPER_EVENT => "process_helper_event",
        PROCESS_KEY_EVENT => "process_key_event",
        COMMIT_STRING => "commit_string",
        REQUEST_HELP => "request_help",
        REQUEST_FACTORY_MENU => "request_factory_menu",
        CHANGE_FACTORY => "change_factory",
        _ => "unknown",
    }
}
