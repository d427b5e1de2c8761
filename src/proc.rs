//! Stored-procedure engine: compiles and runs JavaScript procedures inside a
//! single replicated write.
//!
//! The script sees two things from the host: an `arguments` array of string
//! arguments, and `exec(sql)`, which runs SQL against the writer handle
//! inside the transaction the state-machine adapter opened around the whole
//! `PROC EXEC`. Rows come back as a two-dimensional array of strings whose
//! first row is the column-name header. Script failures of any kind (compile,
//! throw, panic) surface as command errors referencing `proc.js`.

use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::ptr::NonNull;

use boa_engine::js_string;
use boa_engine::object::builtins::JsArray;
use boa_engine::property::Attribute;
use boa_engine::Context;
use boa_engine::JsError;
use boa_engine::JsNativeError;
use boa_engine::JsResult;
use boa_engine::JsString;
use boa_engine::JsValue;
use boa_engine::NativeFunction;
use boa_engine::Script;
use boa_engine::Source;
use rusqlite::Connection;

use crate::constants::MAX_SCRIPT_RESULT_DEPTH;
use crate::db::exec_collect;
use crate::error::ServerError;
use crate::reply::Reply;

/// Name scripts are reported under in error messages.
pub const SCRIPT_NAME: &str = "proc.js";

/// Reserved procedure name that carries its script inline in the arguments.
pub const INLINE_PROC: &str = "__inline__";

thread_local! {
    // Connection the host `exec` runs against. Set only while `run` holds the
    // writer lock on this thread; cleared by the scope guard before the
    // borrow it was derived from ends.
    static ACTIVE_CONN: Cell<Option<NonNull<Connection>>> = const { Cell::new(None) };
}

struct ConnScope;

impl ConnScope {
    fn enter(conn: &Connection) -> Self {
        ACTIVE_CONN.with(|cell| cell.set(Some(NonNull::from(conn))));
        Self
    }
}

impl Drop for ConnScope {
    fn drop(&mut self) {
        ACTIVE_CONN.with(|cell| cell.set(None));
    }
}

/// Parse a script without running it. Used by `PROC SET` to reject broken
/// scripts before they are stored.
pub fn compile_check(script: &str) -> Result<(), ServerError> {
    let mut context = Context::default();
    Script::parse(Source::from_bytes(script.as_bytes()), None, &mut context)
        .map(|_| ())
        .map_err(|err| ServerError::ProcCompile {
            message: format!("{SCRIPT_NAME}: {err}"),
        })
}

/// Run a script against `conn`, which must already be inside the transaction
/// bracketing the surrounding `PROC EXEC`. Returns the script's value
/// exported to a reply. Panics inside the interpreter or the host callback
/// are caught and converted to errors.
pub fn run(conn: &Connection, script: &str, args: &[String]) -> Result<Reply, ServerError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| run_inner(conn, script, args))) {
        Ok(result) => result,
        Err(panic) => Err(ServerError::ProcRuntime {
            message: format!("{SCRIPT_NAME}: {}", panic_message(panic.as_ref())),
        }),
    }
}

fn run_inner(conn: &Connection, script: &str, args: &[String]) -> Result<Reply, ServerError> {
    let mut context = Context::default();
    context
        .register_global_callable(js_string!("exec"), 1, NativeFunction::from_fn_ptr(host_exec))
        .map_err(|err| ServerError::Internal {
            message: format!("registering exec: {err}"),
        })?;

    let js_args = JsArray::from_iter(
        args.iter().map(|a| JsValue::from(JsString::from(a.as_str()))),
        &mut context,
    );
    context
        .register_global_property(js_string!("arguments"), js_args, Attribute::all())
        .map_err(|err| ServerError::Internal {
            message: format!("registering arguments: {err}"),
        })?;

    let _scope = ConnScope::enter(conn);
    let value = context
        .eval(Source::from_bytes(script.as_bytes()))
        .map_err(|err| ServerError::ProcRuntime {
            message: format!("{SCRIPT_NAME}: {err}"),
        })?;
    export_value(&value, &mut context, 0)
}

/// The `exec(sql)` host function.
fn host_exec(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let arg = match args.first() {
        Some(arg) if !arg.is_undefined() => arg,
        _ => return Err(script_error("exec: statement not provided")),
    };
    let sql = match arg.as_string() {
        Some(sql) => sql.to_std_string_escaped(),
        None => return Err(script_error("exec: statement not a string")),
    };
    let ptr = ACTIVE_CONN.with(|cell| cell.get());
    let ptr = match ptr {
        Some(ptr) => ptr,
        None => return Err(script_error("exec: no transaction in progress")),
    };
    // SAFETY: the pointer was installed by `ConnScope::enter` from a reference
    // that outlives the whole script evaluation on this thread.
    let conn = unsafe { ptr.as_ref() };
    let rows = exec_collect(conn, &sql).map_err(|err| script_error(&format!("exec: {err}")))?;

    let js_rows: Vec<JsValue> = rows
        .into_iter()
        .map(|row| {
            let cells: Vec<JsValue> = row
                .into_iter()
                .map(|col| JsValue::from(JsString::from(col)))
                .collect();
            JsValue::from(JsArray::from_iter(cells, context))
        })
        .collect();
    Ok(JsValue::from(JsArray::from_iter(js_rows, context)))
}

fn script_error(message: &str) -> JsError {
    JsNativeError::error().with_message(message.to_string()).into()
}

/// Export a script value to the reply shape: null/undefined become nil,
/// booleans and whole numbers become integers, strings become bulk strings,
/// arrays recurse. Anything else is rendered through the value's display.
fn export_value(value: &JsValue, context: &mut Context, depth: usize) -> Result<Reply, ServerError> {
    if depth > MAX_SCRIPT_RESULT_DEPTH {
        return Err(ServerError::ProcRuntime {
            message: format!("{SCRIPT_NAME}: return value nested too deeply"),
        });
    }
    if value.is_null() || value.is_undefined() {
        return Ok(Reply::Nil);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Reply::Integer(i64::from(b)));
    }
    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
            return Ok(Reply::Integer(n as i64));
        }
        return Ok(Reply::Bulk(n.to_string()));
    }
    if let Some(s) = value.as_string() {
        return Ok(Reply::Bulk(s.to_std_string_escaped()));
    }
    if let Some(obj) = value.as_object() {
        if obj.is_array() {
            let array = JsArray::from_object(obj.clone()).map_err(|err| ServerError::ProcRuntime {
                message: format!("{SCRIPT_NAME}: {err}"),
            })?;
            let len = array.length(context).map_err(|err| ServerError::ProcRuntime {
                message: format!("{SCRIPT_NAME}: {err}"),
            })?;
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = array.get(i, context).map_err(|err| ServerError::ProcRuntime {
                    message: format!("{SCRIPT_NAME}: {err}"),
                })?;
                items.push(export_value(&item, context, depth + 1)?);
            }
            return Ok(Reply::Array(items));
        }
    }
    Ok(Reply::Bulk(value.display().to_string()))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "script panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE c (v INT); INSERT INTO c VALUES (0);")
            .unwrap();
        conn
    }

    #[test]
    fn test_compile_check() {
        assert!(compile_check("function run() { return 1; } run();").is_ok());
        let err = compile_check("function run( {").unwrap_err();
        assert!(err.to_string().starts_with("proc.js: "), "{err}");
    }

    #[test]
    fn test_run_returns_script_value() {
        let conn = scratch();
        assert_eq!(run(&conn, "1 + 1", &[]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&conn, "'hi'", &[]).unwrap(), Reply::Bulk("hi".into()));
        assert_eq!(run(&conn, "null", &[]).unwrap(), Reply::Nil);
        assert_eq!(run(&conn, "true", &[]).unwrap(), Reply::Integer(1));
        assert_eq!(
            run(&conn, "[1, 'a']", &[]).unwrap(),
            Reply::Array(vec![Reply::Integer(1), Reply::Bulk("a".into())])
        );
    }

    #[test]
    fn test_run_sees_arguments() {
        let conn = scratch();
        assert_eq!(
            run(&conn, "arguments[0] + arguments[1]", &["a".into(), "b".into()]).unwrap(),
            Reply::Bulk("ab".into())
        );
    }

    #[test]
    fn test_exec_updates_and_reads_rows() {
        let conn = scratch();
        let script = "function run() {
            exec('UPDATE c SET v = v + 1');
            return exec('SELECT v FROM c')[1][0];
        }
        run();";
        assert_eq!(run(&conn, script, &[]).unwrap(), Reply::Bulk("1".into()));
        assert_eq!(run(&conn, script, &[]).unwrap(), Reply::Bulk("2".into()));
    }

    #[test]
    fn test_exec_header_row_first() {
        let conn = scratch();
        let rows = run(&conn, "exec('SELECT v FROM c')", &[]).unwrap();
        assert_eq!(
            rows,
            Reply::Array(vec![
                Reply::Array(vec![Reply::Bulk("v".into())]),
                Reply::Array(vec![Reply::Bulk("0".into())]),
            ])
        );
    }

    #[test]
    fn test_exec_argument_contract() {
        let conn = scratch();
        let err = run(&conn, "exec()", &[]).unwrap_err();
        assert!(err.to_string().contains("exec: statement not provided"), "{err}");

        let err = run(&conn, "exec(42)", &[]).unwrap_err();
        assert!(err.to_string().contains("exec: statement not a string"), "{err}");
    }

    #[test]
    fn test_exec_engine_error_is_catchable() {
        let conn = scratch();
        let script = "var caught = '';
        try { exec('TOTALLY NOT SQL'); } catch (e) { caught = String(e); }
        caught;";
        let reply = run(&conn, script, &[]).unwrap();
        match reply {
            Reply::Bulk(s) => assert!(s.contains("exec:"), "{s}"),
            other => panic!("expected bulk, got {other:?}"),
        }
    }

    #[test]
    fn test_uncaught_error_references_script_name() {
        let conn = scratch();
        let err = run(&conn, "throw 'boom';", &[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("proc.js: "), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }
}
