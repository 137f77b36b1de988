//! `<epp>` envelope encoding and decoding.
//!
//! Everything in the envelope namespace is handled here; object and
//! extension content is delegated to the [`CodecRegistry`].

use chrono::{DateTime, SecondsFormat, Utc};

use super::error::{DecodeError, EncodeError};
use super::registry::CodecRegistry;
use super::xml::Element;
use crate::protocol::{
    Command, CommandKind, CommandType, Dcp, DcpStatement, EppResult, Extensions,
    Greeting, Login, Message, MessageQueue, PollOp, Response, ResultCode, ResultValue,
    TransactionId, Verb, EPP_NS,
};

/// Client transaction ids are 3 to 64 characters.
const CL_TRID_LEN: std::ops::RangeInclusive<usize> = 3..=64;

// ============================================================================
// Decoding
// ============================================================================

pub(crate) fn decode_message(root: &Element, registry: &CodecRegistry) -> Result<Message, DecodeError> {
    if !root.is(EPP_NS, "epp") {
        return Err(DecodeError::Malformed(format!(
            "root element {{{}}}{} is not an epp envelope",
            root.namespace, root.name
        )));
    }
    let body = match root.children.as_slice() {
        [body] => body,
        [] => return Err(DecodeError::Malformed("empty epp envelope".to_string())),
        _ => return Err(DecodeError::Malformed("epp envelope has multiple children".to_string())),
    };
    if body.namespace != EPP_NS {
        return Err(DecodeError::UnknownCommand(body.name.clone()));
    }

    match body.name.as_str() {
        "hello" => Ok(Message::Hello),
        "greeting" => decode_greeting(body).map(Message::Greeting),
        "command" => decode_command(body, registry).map(Message::Command),
        "response" => decode_response(body, registry).map(Message::Response),
        other => Err(DecodeError::UnknownCommand(other.to_string())),
    }
}

fn decode_command(element: &Element, registry: &CodecRegistry) -> Result<Command, DecodeError> {
    let mut kind = None;
    let mut extensions = Extensions::new();
    let mut client_trans_id = None;

    for child in &element.children {
        if child.namespace != EPP_NS {
            return Err(DecodeError::UnknownCommand(child.name.clone()));
        }
        match child.name.as_str() {
            "extension" => decode_extensions(child, registry, &mut extensions)?,
            "clTRID" => client_trans_id = Some(decode_cl_trid(&child.text)?),
            _ => {
                if kind.is_some() {
                    return Err(DecodeError::Malformed(
                        "command carries more than one operation".to_string(),
                    ));
                }
                kind = Some(decode_command_kind(child, registry)?);
            },
        }
    }

    let kind = kind.ok_or_else(|| DecodeError::missing("command operation"))?;
    if let CommandKind::Object { verb, payload } = &kind {
        for required in registry.required_extensions(payload.namespace(), verb.command_type()) {
            if !extensions.contains_namespace(required) {
                return Err(DecodeError::missing(format!("extension {required}")));
            }
        }
    }

    Ok(Command {
        kind,
        extensions,
        client_trans_id,
    })
}

fn decode_cl_trid(text: &str) -> Result<String, DecodeError> {
    if !CL_TRID_LEN.contains(&text.chars().count()) {
        return Err(DecodeError::invalid("clTRID", text));
    }
    Ok(text.to_string())
}

fn decode_command_kind(element: &Element, registry: &CodecRegistry) -> Result<CommandKind, DecodeError> {
    let command_type = CommandType::from_element_name(&element.name)
        .ok_or_else(|| DecodeError::UnknownCommand(element.name.clone()))?;

    let verb = match command_type {
        CommandType::Login => return decode_login(element).map(CommandKind::Login),
        CommandType::Logout => return Ok(CommandKind::Logout),
        CommandType::Poll => return decode_poll(element).map(CommandKind::Poll),
        CommandType::Check => Verb::Check,
        CommandType::Info => Verb::Info,
        CommandType::Create => Verb::Create,
        CommandType::Delete => Verb::Delete,
        CommandType::Renew => Verb::Renew,
        CommandType::Update => Verb::Update,
        CommandType::Transfer => Verb::Transfer(element.required_attr("op")?.parse()?),
    };

    let object = match element.children.as_slice() {
        [object] => object,
        [] => return Err(DecodeError::missing(format!("{}/object", element.name))),
        _ => {
            return Err(DecodeError::Malformed(format!(
                "{} carries more than one object",
                element.name
            )))
        },
    };
    let payload = registry.decode_service(object)?;
    Ok(CommandKind::Object { verb, payload })
}

fn decode_login(element: &Element) -> Result<Login, DecodeError> {
    let options = element.required_child(EPP_NS, "options")?;
    let services = element.required_child(EPP_NS, "svcs")?;

    let object_uris = services
        .children_named(EPP_NS, "objURI")
        .map(|e| e.text.clone())
        .collect();
    let extension_uris = services
        .child(EPP_NS, "svcExtension")
        .map(|ext| {
            ext.children_named(EPP_NS, "extURI")
                .map(|e| e.text.clone())
                .collect()
        })
        .unwrap_or_default();

    Ok(Login {
        client_id: element.required_text(EPP_NS, "clID")?.to_string(),
        password: element.required_text(EPP_NS, "pw")?.to_string(),
        new_password: element.child_text(EPP_NS, "newPW").map(str::to_string),
        version: options.required_text(EPP_NS, "version")?.to_string(),
        lang: options.required_text(EPP_NS, "lang")?.to_string(),
        object_uris,
        extension_uris,
    })
}

fn decode_poll(element: &Element) -> Result<PollOp, DecodeError> {
    match element.required_attr("op")? {
        "req" => Ok(PollOp::Request),
        "ack" => Ok(PollOp::Acknowledge(element.required_attr("msgID")?.to_string())),
        other => Err(DecodeError::invalid("poll@op", other)),
    }
}

fn decode_extensions(
    element: &Element,
    registry: &CodecRegistry,
    extensions: &mut Extensions,
) -> Result<(), DecodeError> {
    for child in &element.children {
        if let Some(extension) = registry.decode_extension(child)? {
            extensions.insert(extension)?;
        }
    }
    Ok(())
}

fn decode_response(element: &Element, registry: &CodecRegistry) -> Result<Response, DecodeError> {
    let mut results = Vec::new();
    let mut msg_queue = None;
    let mut res_data = None;
    let mut extensions = Extensions::new();
    let mut trans_id = None;

    for child in &element.children {
        if child.namespace != EPP_NS {
            return Err(DecodeError::Malformed(format!(
                "unexpected element {{{}}}{} in response",
                child.namespace, child.name
            )));
        }
        match child.name.as_str() {
            "result" => results.push(decode_result(child)?),
            "msgQ" => msg_queue = Some(decode_msg_queue(child)?),
            "resData" => {
                let data = match child.children.as_slice() {
                    [data] => data,
                    [] => return Err(DecodeError::missing("resData/object")),
                    _ => {
                        return Err(DecodeError::Malformed(
                            "resData carries more than one object".to_string(),
                        ))
                    },
                };
                res_data = Some(registry.decode_service(data)?);
            },
            "extension" => decode_extensions(child, registry, &mut extensions)?,
            "trID" => {
                trans_id = Some(TransactionId {
                    client: child.child_text(EPP_NS, "clTRID").map(str::to_string),
                    server: child.required_text(EPP_NS, "svTRID")?.to_string(),
                })
            },
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unexpected element {other} in response"
                )))
            },
        }
    }

    if results.is_empty() {
        return Err(DecodeError::missing("response/result"));
    }
    Ok(Response {
        results,
        msg_queue,
        res_data,
        extensions,
        trans_id: trans_id.ok_or_else(|| DecodeError::missing("response/trID"))?,
    })
}

fn decode_result(element: &Element) -> Result<EppResult, DecodeError> {
    let raw = element.required_attr("code")?;
    let code = raw
        .parse::<u16>()
        .ok()
        .and_then(ResultCode::from_code)
        .ok_or_else(|| DecodeError::invalid("result@code", raw))?;

    let msg = element.required_child(EPP_NS, "msg")?;
    let mut result = EppResult::new(code).with_message(msg.text.clone());
    result.lang = msg.attr("lang").unwrap_or("en").to_string();

    for child in &element.children {
        if child.is(EPP_NS, "value") {
            if let Some(value) = child.children.first() {
                result.values.push(ResultValue::new(value.clone()));
            }
        } else if child.is(EPP_NS, "extValue") {
            let value = child
                .required_child(EPP_NS, "value")?
                .children
                .first()
                .cloned()
                .ok_or_else(|| DecodeError::missing("extValue/value"))?;
            let reason = child.required_text(EPP_NS, "reason")?;
            result.values.push(ResultValue::with_reason(value, reason));
        }
    }
    Ok(result)
}

fn decode_msg_queue(element: &Element) -> Result<MessageQueue, DecodeError> {
    let raw = element.required_attr("count")?;
    let count = raw
        .parse()
        .map_err(|_| DecodeError::invalid("msgQ@count", raw))?;

    let queue_date = element
        .child_text(EPP_NS, "qDate")
        .map(|d| decode_date("msgQ/qDate", d))
        .transpose()?;
    let msg = element.child(EPP_NS, "msg");

    Ok(MessageQueue {
        count,
        id: element.attr("id").map(str::to_string),
        queue_date,
        message: msg.map(|m| m.text.clone()),
        lang: msg
            .and_then(|m| m.attr("lang"))
            .unwrap_or("en")
            .to_string(),
    })
}

fn decode_greeting(element: &Element) -> Result<Greeting, DecodeError> {
    let menu = element.required_child(EPP_NS, "svcMenu")?;
    let texts = |name: &'static str| -> Vec<String> {
        menu.children_named(EPP_NS, name)
            .map(|e| e.text.clone())
            .collect()
    };

    let extension_uris = menu
        .child(EPP_NS, "svcExtension")
        .map(|ext| {
            ext.children_named(EPP_NS, "extURI")
                .map(|e| e.text.clone())
                .collect()
        })
        .unwrap_or_default();

    let dcp = match element.child(EPP_NS, "dcp") {
        Some(dcp) => decode_dcp(dcp)?,
        None => Dcp::default(),
    };

    Ok(Greeting {
        server_id: element.required_text(EPP_NS, "svID")?.to_string(),
        server_date: decode_date("svDate", element.required_text(EPP_NS, "svDate")?)?,
        versions: texts("version"),
        languages: texts("lang"),
        object_uris: texts("objURI"),
        extension_uris,
        dcp,
    })
}

fn decode_dcp(element: &Element) -> Result<Dcp, DecodeError> {
    let access = element
        .required_child(EPP_NS, "access")?
        .children
        .first()
        .ok_or_else(|| DecodeError::missing("dcp/access"))?
        .name
        .parse()?;

    let names = |parent: &Element| -> Vec<String> {
        parent.children.iter().map(|c| c.name.clone()).collect()
    };

    let mut statements = Vec::new();
    for statement in element.children_named(EPP_NS, "statement") {
        let retention = statement
            .required_child(EPP_NS, "retention")?
            .children
            .first()
            .map(|c| c.name.clone())
            .ok_or_else(|| DecodeError::missing("statement/retention"))?;
        statements.push(DcpStatement {
            purposes: names(statement.required_child(EPP_NS, "purpose")?),
            recipients: names(statement.required_child(EPP_NS, "recipient")?),
            retention,
        });
    }

    Ok(Dcp { access, statements })
}

fn decode_date(field: &str, value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| DecodeError::invalid(field, value))
}

/// Best-effort recovery of the client transaction id from a document that
/// failed to decode, so the error response can still echo it.
pub(crate) fn find_client_trans_id(root: &Element) -> Option<String> {
    root.child(EPP_NS, "command")?
        .child_text(EPP_NS, "clTRID")
        .filter(|id| CL_TRID_LEN.contains(&id.chars().count()))
        .map(str::to_string)
}

/// Verb element name of a `<command>` document that failed to decode.
///
/// `Some("")` when the command element carries no recognizable verb.
pub(crate) fn find_command_verb(root: &Element) -> Option<String> {
    let command = root.child(EPP_NS, "command")?;
    Some(
        command
            .children
            .iter()
            .find(|c| c.namespace == EPP_NS && c.name != "extension" && c.name != "clTRID")
            .map(|c| c.name.clone())
            .unwrap_or_default(),
    )
}

// ============================================================================
// Encoding
// ============================================================================

pub(crate) fn encode_message(message: &Message, registry: &CodecRegistry) -> Result<Element, EncodeError> {
    let body = match message {
        Message::Hello => epp("hello"),
        Message::Greeting(greeting) => encode_greeting(greeting),
        Message::Command(command) => encode_command(command, registry)?,
        Message::Response(response) => encode_response(response, registry)?,
    };
    Ok(epp("epp").with_child(body))
}

fn epp(name: &str) -> Element {
    Element::new(EPP_NS, name)
}

fn encode_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn encode_extensions(extensions: &Extensions, registry: &CodecRegistry) -> Result<Option<Element>, EncodeError> {
    if extensions.is_empty() {
        return Ok(None);
    }
    let mut element = epp("extension");
    for extension in extensions.iter() {
        element.children.push(registry.encode_extension(extension)?);
    }
    Ok(Some(element))
}

fn encode_command(command: &Command, registry: &CodecRegistry) -> Result<Element, EncodeError> {
    let operation = match &command.kind {
        CommandKind::Login(login) => encode_login(login),
        CommandKind::Logout => epp("logout"),
        CommandKind::Poll(PollOp::Request) => epp("poll").with_attr("op", "req"),
        CommandKind::Poll(PollOp::Acknowledge(id)) => epp("poll")
            .with_attr("op", "ack")
            .with_attr("msgID", id.as_str()),
        CommandKind::Object { verb, payload } => {
            let mut element = epp(verb.command_type().element_name());
            if let Verb::Transfer(op) = verb {
                element = element.with_attr("op", op.as_str());
            }
            element.with_child(registry.encode_service(payload.as_ref())?)
        },
    };

    let mut element = epp("command").with_child(operation);
    if let Some(extensions) = encode_extensions(&command.extensions, registry)? {
        element.children.push(extensions);
    }
    if let Some(id) = &command.client_trans_id {
        element = element.with_text_child("clTRID", id.as_str());
    }
    Ok(element)
}

fn encode_login(login: &Login) -> Element {
    let mut element = epp("login")
        .with_text_child("clID", login.client_id.as_str())
        .with_text_child("pw", login.password.as_str());
    if let Some(new_password) = &login.new_password {
        element = element.with_text_child("newPW", new_password.as_str());
    }

    let options = epp("options")
        .with_text_child("version", login.version.as_str())
        .with_text_child("lang", login.lang.as_str());

    let mut services = epp("svcs").with_children(
        login
            .object_uris
            .iter()
            .map(|uri| epp("objURI").with_text(uri.as_str())),
    );
    if !login.extension_uris.is_empty() {
        services = services.with_child(
            epp("svcExtension").with_children(
                login
                    .extension_uris
                    .iter()
                    .map(|uri| epp("extURI").with_text(uri.as_str())),
            ),
        );
    }

    element.with_child(options).with_child(services)
}

fn encode_response(response: &Response, registry: &CodecRegistry) -> Result<Element, EncodeError> {
    if response.results.is_empty() {
        return Err(EncodeError::EmptyResponse);
    }

    let mut element = epp("response").with_children(response.results.iter().map(encode_result));

    if let Some(queue) = &response.msg_queue {
        let mut msg_q = epp("msgQ").with_attr("count", queue.count.to_string());
        if let Some(id) = &queue.id {
            msg_q = msg_q.with_attr("id", id.as_str());
        }
        if let Some(date) = &queue.queue_date {
            msg_q = msg_q.with_text_child("qDate", encode_date(date));
        }
        if let Some(message) = &queue.message {
            msg_q = msg_q.with_child(
                epp("msg")
                    .with_attr("lang", queue.lang.as_str())
                    .with_text(message.as_str()),
            );
        }
        element.children.push(msg_q);
    }

    if let Some(data) = &response.res_data {
        element.children.push(epp("resData").with_child(registry.encode_service(data.as_ref())?));
    }
    if let Some(extensions) = encode_extensions(&response.extensions, registry)? {
        element.children.push(extensions);
    }

    let mut tr_id = epp("trID");
    if let Some(client) = &response.trans_id.client {
        tr_id = tr_id.with_text_child("clTRID", client.as_str());
    }
    tr_id = tr_id.with_text_child("svTRID", response.trans_id.server.as_str());
    Ok(element.with_child(tr_id))
}

fn encode_result(result: &EppResult) -> Element {
    let mut element = epp("result")
        .with_attr("code", result.code.code().to_string())
        .with_child(
            epp("msg")
                .with_attr("lang", result.lang.as_str())
                .with_text(result.message.as_str()),
        );
    for value in &result.values {
        let inner = epp("value").with_child(value.value.clone());
        element.children.push(match &value.reason {
            None => inner,
            Some(reason) => epp("extValue")
                .with_child(inner)
                .with_child(epp("reason").with_text(reason.as_str())),
        });
    }
    element
}

fn encode_greeting(greeting: &Greeting) -> Element {
    let texts = |name: &'static str, values: &[String]| -> Vec<Element> {
        values.iter().map(|v| epp(name).with_text(v.as_str())).collect()
    };

    let mut menu = epp("svcMenu")
        .with_children(texts("version", &greeting.versions))
        .with_children(texts("lang", &greeting.languages))
        .with_children(texts("objURI", &greeting.object_uris));
    if !greeting.extension_uris.is_empty() {
        menu = menu.with_child(epp("svcExtension").with_children(texts("extURI", &greeting.extension_uris)));
    }

    epp("greeting")
        .with_text_child("svID", greeting.server_id.as_str())
        .with_text_child("svDate", encode_date(&greeting.server_date))
        .with_child(menu)
        .with_child(encode_dcp(&greeting.dcp))
}

fn encode_dcp(dcp: &Dcp) -> Element {
    let empties = |values: &[String]| -> Vec<Element> { values.iter().map(|v| epp(v.as_str())).collect() };

    epp("dcp")
        .with_child(epp("access").with_child(epp(dcp.access.as_str())))
        .with_children(dcp.statements.iter().map(|statement| {
            epp("statement")
                .with_child(epp("purpose").with_children(empties(&statement.purposes)))
                .with_child(epp("recipient").with_children(empties(&statement.recipients)))
                .with_child(epp("retention").with_child(epp(&statement.retention)))
        }))
}
