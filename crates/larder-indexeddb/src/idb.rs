//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`, and converts keys
//! and records between `serde_json` and JS values.

use std::cell::RefCell;
use std::ops::Bound;
use std::rc::Rc;

use js_sys::{Array, Promise};
use larder_core::engine::{EngineError, SchemaEditor, TxOutcome, UpgradeFn, VersionChange};
use larder_core::logging::prefix;
use larder_core::schema::{IndexConfig, KeyPolicy};
use larder_core::{Key, KeyRange};
use serde_json::Value;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomException, DomStringList, IdbDatabase, IdbFactory, IdbIndexParameters,
    IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest, IdbTransaction,
    IdbVersionChangeEvent,
};

use crate::error::{js_error, IndexedDbError, Result};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Convert the next success/error of an IdbRequest into a JS Promise.
///
/// Rejects with the request's DOMException so its name survives. Cursor
/// requests fire once per step; call this again after each `continue()`.
pub(crate) fn request_to_promise(req: &IdbRequest) -> Promise {
    let req = req.clone();

    Promise::new(&mut move |resolve, reject| {
        // Store closures in Rc<RefCell> to manage their lifetime without leaking
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let err = match req_e.error() {
                Ok(Some(e)) => JsValue::from(e),
                _ => JsValue::from_str("unknown IDB error"),
            };
            let _ = reject.call1(&JsValue::UNDEFINED, &err);
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        // Keep both closures alive until one fires
        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let promise = request_to_promise(req);
    JsFuture::from(promise).await.map_err(IndexedDbError::from)
}

/// Completion watcher for one transaction.
///
/// Listeners are attached when the watcher is created, so a transaction that
/// completes before anyone awaits it is still observed.
pub(crate) struct TxWatch {
    done: JsFuture,
    outcome: Rc<RefCell<Option<TxOutcome>>>,
}

impl TxWatch {
    pub(crate) async fn wait(self) -> TxOutcome {
        // the promise never rejects; the outcome is recorded before it resolves
        let _ = self.done.await;
        self.outcome.borrow_mut().take().unwrap_or_else(|| {
            TxOutcome::Failed(EngineError::unknown("transaction ended without an outcome"))
        })
    }
}

fn settle(slot: &RefCell<Option<TxOutcome>>, outcome: TxOutcome) {
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(outcome);
    }
}

fn dom_error(e: &DomException) -> EngineError {
    EngineError::new(e.name(), e.message())
}

/// Start watching `tx` for complete, error and abort.
///
/// A failed request fires `error` and then `abort`; the first recorded
/// failure wins. An explicit abort has no error and reports `Aborted`.
pub(crate) fn watch_transaction(tx: &IdbTransaction) -> TxWatch {
    let outcome: Rc<RefCell<Option<TxOutcome>>> = Rc::new(RefCell::new(None));
    let tx = tx.clone();
    let slot = outcome.clone();

    let promise = Promise::new(&mut move |resolve, _reject| {
        type Handlers = (EventClosure, EventClosure, EventClosure);
        let closures: Rc<RefCell<Option<Handlers>>> = Rc::new(RefCell::new(None));

        let (tx_c, slot_c, closures_c, resolve_c) =
            (tx.clone(), slot.clone(), closures.clone(), resolve.clone());
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            settle(&slot_c, TxOutcome::Completed);
            let _ = resolve_c.call0(&JsValue::UNDEFINED);
            detach(&tx_c);
            *closures_c.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        // error is always followed by abort or complete; only record it here
        let slot_e = slot.clone();
        let on_error = Closure::wrap(Box::new(move |event: web_sys::Event| {
            let err = event
                .target()
                .and_then(|t| t.dyn_into::<IdbRequest>().ok())
                .and_then(|req| req.error().ok().flatten())
                .map(|e| dom_error(&e))
                .unwrap_or_else(|| EngineError::unknown("request failed"));
            settle(&slot_e, TxOutcome::Failed(err));
        }) as Box<dyn FnMut(web_sys::Event)>);

        let (tx_a, slot_a, closures_a) = (tx.clone(), slot.clone(), closures.clone());
        let on_abort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let outcome = match tx_a.error() {
                Some(e) => TxOutcome::Failed(dom_error(&e)),
                None => TxOutcome::Aborted,
            };
            settle(&slot_a, outcome);
            let _ = resolve.call0(&JsValue::UNDEFINED);
            detach(&tx_a);
            *closures_a.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_error, on_abort));
    });

    TxWatch {
        done: JsFuture::from(promise),
        outcome,
    }
}

fn detach(tx: &IdbTransaction) {
    tx.set_oncomplete(None);
    tx.set_onerror(None);
    tx.set_onabort(None);
}

/// Schema editor over the version-change transaction of an open request.
struct IdbEditor {
    db: IdbDatabase,
    tx: IdbTransaction,
}

impl SchemaEditor for IdbEditor {
    fn collection_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn index_names(&self, collection: &str) -> std::result::Result<Vec<String>, EngineError> {
        let store = self.tx.object_store(collection).map_err(js_error)?;
        Ok(string_list(&store.index_names()))
    }

    fn create_collection(
        &mut self,
        name: &str,
        policy: &KeyPolicy,
    ) -> std::result::Result<(), EngineError> {
        let params = IdbObjectStoreParameters::new();
        if let Some(path) = &policy.key_path {
            js_sys::Reflect::set(&params, &"keyPath".into(), &JsValue::from_str(path))
                .map_err(js_error)?;
        }
        if policy.auto_generate {
            js_sys::Reflect::set(&params, &"autoIncrement".into(), &JsValue::TRUE)
                .map_err(js_error)?;
        }
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(js_error)?;
        Ok(())
    }

    fn create_index(
        &mut self,
        collection: &str,
        index: &IndexConfig,
    ) -> std::result::Result<(), EngineError> {
        let store = self.tx.object_store(collection).map_err(js_error)?;
        let params = IdbIndexParameters::new();
        js_sys::Reflect::set(&params, &"unique".into(), &JsValue::from_bool(index.unique))
            .map_err(js_error)?;
        js_sys::Reflect::set(
            &params,
            &"multiEntry".into(),
            &JsValue::from_bool(index.multi_entry),
        )
        .map_err(js_error)?;
        store
            .create_index_with_str_and_optional_parameters(&index.name, &index.key_path, &params)
            .map_err(js_error)?;
        Ok(())
    }
}

/// Open `name` at `version`, running `upgrade` inside `upgradeneeded`.
///
/// If `upgrade` fails the version-change transaction is aborted and its error
/// is returned in place of the engine's `AbortError`.
pub async fn open_database(
    name: &str,
    version: u32,
    upgrade: UpgradeFn,
) -> std::result::Result<IdbDatabase, EngineError> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = factory.open_with_u32(name, version).map_err(js_error)?;

    let mut pending = Some(upgrade);
    let failure: Rc<RefCell<Option<EngineError>>> = Rc::new(RefCell::new(None));

    let req = open_req.clone();
    let failure_slot = failure.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let Some(run) = pending.take() else {
            return;
        };
        let change = VersionChange {
            old: event.old_version() as u32,
            new: event.new_version().map(|v| v as u32).unwrap_or(version),
        };

        let result = match (req.result(), req.transaction()) {
            (Ok(db), Some(tx)) => run(
                &mut IdbEditor {
                    db: db.unchecked_into(),
                    tx,
                },
                change,
            ),
            _ => Err(EngineError::invalid_state(
                "upgradeneeded fired without a version change transaction",
            )),
        };

        if let Err(e) = result {
            if let Some(tx) = req.transaction() {
                let _ = tx.abort();
            }
            *failure_slot.borrow_mut() = Some(e);
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    let db_name = name.to_string();
    let on_blocked = Closure::wrap(Box::new(move |_event: web_sys::Event| {
        warn!(db = %db_name, "{} open blocked by another connection", prefix::DB);
    }) as Box<dyn FnMut(web_sys::Event)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    open_req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

    let result = JsFuture::from(request_to_promise(open_req.unchecked_ref())).await;

    // the closures are dropped when this function returns
    open_req.set_onupgradeneeded(None);
    open_req.set_onblocked(None);

    if let Some(e) = failure.borrow_mut().take() {
        return Err(e);
    }

    result
        .map_err(js_error)?
        .dyn_into::<IdbDatabase>()
        .map_err(|_| EngineError::unknown("open result is not an IDBDatabase"))
}

/// Delete an IndexedDB database by name.
pub async fn delete_database(db_name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory.delete_database(db_name)?;
    await_request(req.unchecked_ref()).await?;
    Ok(())
}

pub(crate) fn string_list(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

pub fn key_from_js(value: &JsValue) -> std::result::Result<Key, EngineError> {
    if let Some(n) = value.as_f64() {
        return Key::try_from(n);
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if Array::is_array(value) {
        return Array::from(value)
            .iter()
            .map(|item| key_from_js(&item))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Key::Array);
    }
    Err(EngineError::data(format!("unsupported key value: {:?}", value)))
}

/// JSON record to a structured-clonable JS value.
pub fn value_to_js(value: &Value) -> std::result::Result<JsValue, EngineError> {
    let text = serde_json::to_string(value).map_err(IndexedDbError::from)?;
    js_sys::JSON::parse(&text).map_err(js_error)
}

/// JS value back to JSON. `undefined` becomes `null`.
pub fn value_from_js(value: &JsValue) -> std::result::Result<Value, EngineError> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    let text: String = js_sys::JSON::stringify(value).map_err(js_error)?.into();
    Ok(serde_json::from_str(&text).map_err(IndexedDbError::from)?)
}

fn bound_to_js(bound: Bound<&Key>) -> Option<(JsValue, bool)> {
    match bound {
        Bound::Included(k) => Some((key_to_js(k), false)),
        Bound::Excluded(k) => Some((key_to_js(k), true)),
        Bound::Unbounded => None,
    }
}

/// `None` for a range with no bounds at all.
pub fn range_to_js(range: &KeyRange) -> std::result::Result<Option<web_sys::IdbKeyRange>, EngineError> {
    let range = match (bound_to_js(range.lower()), bound_to_js(range.upper())) {
        (Some((lower, lower_open)), Some((upper, upper_open))) => {
            web_sys::IdbKeyRange::bound_with_lower_open_and_upper_open(
                &lower, &upper, lower_open, upper_open,
            )
        }
        (Some((lower, open)), None) => web_sys::IdbKeyRange::lower_bound_with_open(&lower, open),
        (None, Some((upper, open))) => web_sys::IdbKeyRange::upper_bound_with_open(&upper, open),
        (None, None) => return Ok(None),
    };
    range.map(Some).map_err(js_error)
}
