//! The browser's IndexedDB behind larder's engine traits

use std::cell::Cell;
use std::rc::Rc;

use larder_core::engine::{
    CursorRow, Engine, EngineCursor, EngineError, EngineTransaction, Handle, TxMode, TxOutcome,
    UpgradeFn,
};
use larder_core::logging::prefix;
use larder_core::{Key, KeyRange};
use serde_json::Value;
use tracing::info;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    IdbCursor, IdbCursorWithValue, IdbDatabase, IdbObjectStore, IdbRequest, IdbTransaction,
    IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::js_error;
use crate::idb::{self, TxWatch};

type EngineResult<T> = std::result::Result<T, EngineError>;

/// IndexedDB from the global scope (window or worker).
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbEngine;

impl IndexedDbEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for IndexedDbEngine {
    type Handle = IndexedDbHandle;

    fn is_available(&self) -> bool {
        idb::idb_factory().is_ok()
    }

    async fn open(&self, name: &str, version: u32, upgrade: UpgradeFn) -> EngineResult<IndexedDbHandle> {
        let db = idb::open_database(name, version, upgrade).await?;
        Ok(IndexedDbHandle::new(db, name))
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        Ok(idb::delete_database(name).await?)
    }
}

struct Connection {
    db: IdbDatabase,
    name: String,
    closed: Rc<Cell<bool>>,
    _on_version_change: Closure<dyn FnMut(IdbVersionChangeEvent)>,
}

// last clone gone: nothing can use the connection any more
impl Drop for Connection {
    fn drop(&mut self) {
        self.db.set_onversionchange(None);
        self.db.close();
    }
}

/// An open IndexedDB connection. Clones share it.
///
/// Closes itself when another connection asks for a newer version or deletes
/// the database, so that request is never blocked by this one.
#[derive(Clone)]
pub struct IndexedDbHandle {
    inner: Rc<Connection>,
}

impl IndexedDbHandle {
    fn new(db: IdbDatabase, name: &str) -> Self {
        let closed = Rc::new(Cell::new(false));

        let (db_c, closed_c, name_c) = (db.clone(), closed.clone(), name.to_string());
        let on_version_change = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            db_c.close();
            closed_c.set(true);
            info!(
                db = %name_c,
                from = event.old_version(),
                to = ?event.new_version(),
                "{} closed for version change",
                prefix::CLOSE
            );
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);
        db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));

        Self {
            inner: Rc::new(Connection {
                db,
                name: name.to_string(),
                closed,
                _on_version_change: on_version_change,
            }),
        }
    }
}

fn idb_mode(mode: TxMode) -> IdbTransactionMode {
    match mode {
        TxMode::ReadOnly => IdbTransactionMode::Readonly,
        TxMode::ReadWrite => IdbTransactionMode::Readwrite,
    }
}

impl Handle for IndexedDbHandle {
    type Transaction = IndexedDbTransaction;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u32 {
        self.inner.db.version() as u32
    }

    fn collection_names(&self) -> Vec<String> {
        idb::string_list(&self.inner.db.object_store_names())
    }

    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>> {
        let tx = self
            .inner
            .db
            .transaction_with_str(collection)
            .map_err(js_error)?;
        let store = tx.object_store(collection).map_err(js_error)?;
        Ok(idb::string_list(&store.index_names()))
    }

    fn transaction(&self, collection: &str, mode: TxMode) -> EngineResult<IndexedDbTransaction> {
        let tx = self
            .inner
            .db
            .transaction_with_str_and_mode(collection, idb_mode(mode))
            .map_err(js_error)?;
        let store = tx.object_store(collection).map_err(js_error)?;
        Ok(IndexedDbTransaction {
            watch: idb::watch_transaction(&tx),
            tx,
            store,
            mode,
        })
    }

    fn close(&self) {
        self.inner.db.close();
        self.inner.closed.set(true);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

/// A single-store IndexedDB transaction.
pub struct IndexedDbTransaction {
    tx: IdbTransaction,
    store: IdbObjectStore,
    mode: TxMode,
    watch: TxWatch,
}

impl IndexedDbTransaction {
    async fn run(&self, req: std::result::Result<IdbRequest, JsValue>) -> EngineResult<JsValue> {
        let req = req.map_err(js_error)?;
        Ok(idb::await_request(&req).await?)
    }
}

fn optional_value(result: JsValue) -> EngineResult<Option<Value>> {
    if result.is_undefined() {
        return Ok(None);
    }
    idb::value_from_js(&result).map(Some)
}

fn value_list(result: JsValue) -> EngineResult<Vec<Value>> {
    js_sys::Array::from(&result)
        .iter()
        .map(|item| idb::value_from_js(&item))
        .collect()
}

impl EngineTransaction for IndexedDbTransaction {
    type Cursor = IndexedDbCursor;

    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        let result = self.run(self.store.get(&idb::key_to_js(key))).await?;
        optional_value(result)
    }

    async fn index_get(&self, index: &str, key: &Key) -> EngineResult<Option<Value>> {
        let index = self.store.index(index).map_err(js_error)?;
        let result = self.run(index.get(&idb::key_to_js(key))).await?;
        optional_value(result)
    }

    async fn index_get_all(&self, index: &str, key: &Key) -> EngineResult<Vec<Value>> {
        let index = self.store.index(index).map_err(js_error)?;
        let result = self.run(index.get_all_with_key(&idb::key_to_js(key))).await?;
        value_list(result)
    }

    async fn get_all(&self) -> EngineResult<Vec<Value>> {
        let result = self.run(self.store.get_all()).await?;
        value_list(result)
    }

    async fn count(&self) -> EngineResult<u64> {
        let result = self.run(self.store.count()).await?;
        Ok(result.as_f64().unwrap_or(0.0) as u64)
    }

    async fn add(&self, value: &Value, key: Option<&Key>) -> EngineResult<Key> {
        let record = idb::value_to_js(value)?;
        let req = match key {
            Some(key) => self.store.add_with_key(&record, &idb::key_to_js(key)),
            None => self.store.add(&record),
        };
        idb::key_from_js(&self.run(req).await?)
    }

    async fn put(&self, value: &Value, key: Option<&Key>) -> EngineResult<Key> {
        let record = idb::value_to_js(value)?;
        let req = match key {
            Some(key) => self.store.put_with_key(&record, &idb::key_to_js(key)),
            None => self.store.put(&record),
        };
        idb::key_from_js(&self.run(req).await?)
    }

    async fn delete(&self, key: &Key) -> EngineResult<()> {
        self.run(self.store.delete(&idb::key_to_js(key))).await?;
        Ok(())
    }

    async fn clear(&self) -> EngineResult<()> {
        self.run(self.store.clear()).await?;
        Ok(())
    }

    async fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<IndexedDbCursor> {
        let range = match range {
            Some(range) => idb::range_to_js(range)?,
            None => None,
        };
        let req = match range {
            Some(range) => self.store.open_cursor_with_range(&range),
            None => self.store.open_cursor(),
        }
        .map_err(js_error)?;
        Ok(IndexedDbCursor::new(req))
    }

    // deprecated in web-sys, still part of IndexedDB 3.0
    #[allow(deprecated)]
    fn commit(&self) -> EngineResult<()> {
        self.tx.commit().map_err(js_error)
    }

    fn abort(&self) -> EngineResult<()> {
        self.tx.abort().map_err(js_error)
    }

    async fn finish(self) -> TxOutcome {
        self.watch.wait().await
    }
}

/// Ascending cursor over an object store.
///
/// The open request fires once per step; each `next` after the first calls
/// `continue()` and waits for the following success.
pub struct IndexedDbCursor {
    request: IdbRequest,
    pending: Option<JsFuture>,
    done: bool,
}

impl IndexedDbCursor {
    fn new(request: IdbRequest) -> Self {
        let pending = Some(JsFuture::from(idb::request_to_promise(&request)));
        Self {
            request,
            pending,
            done: false,
        }
    }
}

impl EngineCursor for IndexedDbCursor {
    async fn next(&mut self) -> EngineResult<Option<CursorRow>> {
        if self.done {
            return Ok(None);
        }

        let step = match self.pending.take() {
            Some(step) => step,
            None => {
                let cursor: IdbCursor = self.request.result().map_err(js_error)?.unchecked_into();
                cursor.continue_().map_err(js_error)?;
                JsFuture::from(idb::request_to_promise(&self.request))
            }
        };

        let result = step.await.map_err(js_error)?;
        if result.is_null() || result.is_undefined() {
            self.done = true;
            return Ok(None);
        }

        let cursor: IdbCursorWithValue = result.unchecked_into();
        let key = idb::key_from_js(&cursor.key().map_err(js_error)?)?;
        let value = idb::value_from_js(&cursor.value().map_err(js_error)?)?;
        Ok(Some(CursorRow { key, value }))
    }
}
