use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{SearchResult, SessionUpdate, Tool, ToolChoice, ToolChoiceMode, ToolOutput};
use crate::protocol::server_events::ServerEvent;
use crate::Result;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const SEARCH_TOOL_NAME: &str = "search_documentation";
const SEARCH_TOOL_DESCRIPTION: &str = "Call this function to search the web for documentation on DevOps and Generative AI topics when answering technical questions.";
const MAX_RESULTS: usize = 3;
const SEARCH_FAILED: &str = "Failed to retrieve search results";
const INVALID_ARGUMENTS: &str = "Invalid tool arguments";

/// Arguments of the search tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query related to DevOps or Generative AI
    pub query: String,
}

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: RootSchema,
}

impl ToolDefinition {
    /// Describe a function tool whose parameters are the fields of `TArgs`.
    #[must_use]
    pub fn for_args<TArgs: JsonSchema>(name: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.into()),
            schema: schemars::schema_for!(TArgs),
        }
    }

    /// Convert into the protocol-level declaration with a strict parameter schema.
    ///
    /// # Errors
    /// Returns an error if schema serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn try_as_tool(&self) -> Result<Tool> {
        let mut parameters = serde_json::to_value(&self.schema)?;
        if let Some(object) = parameters.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
            object.insert("strict".to_string(), Value::Bool(true));
        }
        Ok(Tool::Function {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        })
    }
}

#[must_use]
pub fn search_tool() -> ToolDefinition {
    ToolDefinition::for_args::<SearchArgs>(SEARCH_TOOL_NAME, SEARCH_TOOL_DESCRIPTION)
}

/// The one configuration event declaring the search tool.
///
/// # Errors
/// Returns an error if the tool schema cannot be serialized.
#[allow(clippy::result_large_err)]
pub fn session_update(instructions: Option<String>) -> Result<SessionUpdate> {
    Ok(SessionUpdate {
        instructions,
        tools: Some(vec![search_tool().try_as_tool()?]),
        tool_choice: Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
    })
}

/// Keep the first few organic hits, trimmed to what the model needs.
#[must_use]
pub fn condense(data: &Value) -> ToolOutput {
    let results = data
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .take(MAX_RESULTS)
                .map(|hit| SearchResult {
                    title: string_field(hit, "title"),
                    link: string_field(hit, "link"),
                    snippet: string_field(hit, "snippet"),
                })
                .collect()
        })
        .unwrap_or_default();
    ToolOutput { error: None, results }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub query: String,
}

/// Work the panel asks its owner to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelAction {
    Send(ClientEvent),
    Search(ToolCallRequest),
}

/// What a UI shows next to the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPanelView {
    pub searching: bool,
    pub last_query: Option<String>,
    pub last_results: Option<Value>,
}

/// Reacts to `session.created` and search tool calls.
///
/// One search runs at a time; calls arriving meanwhile wait in order.
#[derive(Debug, Default)]
pub struct ToolPanel {
    instructions: Option<String>,
    configured: bool,
    in_flight: Option<ToolCallRequest>,
    queue: VecDeque<ToolCallRequest>,
    view: ToolPanelView,
}

impl ToolPanel {
    #[must_use]
    pub fn new(instructions: Option<String>) -> Self {
        Self { instructions, ..Self::default() }
    }

    pub fn observe(&mut self, event: &ServerEvent) -> Vec<PanelAction> {
        match event {
            ServerEvent::SessionCreated { .. } if !self.configured => {
                self.configured = true;
                match session_update(self.instructions.clone()) {
                    Ok(update) => vec![PanelAction::Send(ClientEvent::session_update(update))],
                    Err(err) => {
                        warn!("Could not build tool declaration: {err}");
                        Vec::new()
                    }
                }
            }
            ServerEvent::ResponseToolCall { tool_call, .. } if tool_call.name == SEARCH_TOOL_NAME => {
                match serde_json::from_str::<SearchArgs>(&tool_call.arguments) {
                    Ok(args) => {
                        let request = ToolCallRequest {
                            call_id: tool_call.id.clone(),
                            query: args.query,
                        };
                        if self.in_flight.is_some() {
                            debug!(call_id = %request.call_id, "Search busy, queueing tool call");
                            self.queue.push_back(request);
                            Vec::new()
                        } else {
                            vec![self.begin(request)]
                        }
                    }
                    Err(err) => {
                        warn!(call_id = %tool_call.id, "Undecodable tool arguments: {err}");
                        let output = ToolOutput {
                            error: Some(INVALID_ARGUMENTS.to_string()),
                            results: Vec::new(),
                        };
                        respond(&tool_call.id, &output).into_iter().collect()
                    }
                }
            }
            ServerEvent::ResponseToolCall { tool_call, .. } => {
                debug!(name = %tool_call.name, "Ignoring call for undeclared tool");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Settle the in-flight search and start the next queued one, if any.
    pub fn complete(&mut self, call_id: &str, outcome: Result<Value>) -> Vec<PanelAction> {
        if self.in_flight.as_ref().is_none_or(|req| req.call_id != call_id) {
            warn!(call_id, "Search result for a call that is not in flight");
            return Vec::new();
        }
        self.in_flight = None;
        self.view.searching = false;

        let output = match outcome {
            Ok(data) => {
                let output = condense(&data);
                self.view.last_results = Some(data);
                output
            }
            Err(err) => {
                warn!(call_id, "Error performing search: {err}");
                ToolOutput {
                    error: Some(SEARCH_FAILED.to_string()),
                    results: Vec::new(),
                }
            }
        };

        let mut actions: Vec<_> = respond(call_id, &output).into_iter().collect();
        if let Some(next) = self.queue.pop_front() {
            actions.push(self.begin(next));
        }
        actions
    }

    pub fn reset(&mut self) {
        let instructions = self.instructions.take();
        *self = Self::new(instructions);
    }

    #[must_use]
    pub fn view(&self) -> ToolPanelView {
        self.view.clone()
    }

    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    fn begin(&mut self, request: ToolCallRequest) -> PanelAction {
        self.view.searching = true;
        self.view.last_query = Some(request.query.clone());
        self.in_flight = Some(request.clone());
        PanelAction::Search(request)
    }
}

fn respond(call_id: &str, output: &ToolOutput) -> Option<PanelAction> {
    match ClientEvent::tool_call_response(call_id, output) {
        Ok(event) => Some(PanelAction::Send(event)),
        Err(err) => {
            warn!(call_id, "Could not encode tool output: {err}");
            None
        }
    }
}
