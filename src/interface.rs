//! Dynamically registered operation surfaces
//!
//! An [`Interface`] is a named set of operations registered at runtime:
//! two independent dispatch tables (instance-level and type-level), each
//! holding named closures with a visibility and a declared source
//! location. Interfaces notify observers whenever an operation is
//! declared, which is what lets protection installed today keep covering
//! operations declared tomorrow.
//!
//! Dispatch through [`Interface::call`] maintains the thread call stack:
//! the call site captured via `#[track_caller]` becomes the frame that
//! caller verification later matches against protector source ranges.

use crate::error::{GuardError, Result};
use crate::stack;
use crate::types::{InterfaceId, OpKind, SourceLocation, StackFrame, Visibility};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// A block passed through to an operation alongside positional arguments
pub type Block<'a> = &'a dyn Fn(&[Value]) -> Value;

/// Arguments for a single operation call
///
/// Wrappers installed by protection pass the whole invocation through to
/// the preserved original unchanged.
pub struct Invocation<'a> {
    /// Positional arguments
    pub args: &'a [Value],
    /// Optional attached block
    pub block: Option<Block<'a>>,
}

impl<'a> Invocation<'a> {
    /// Invocation with positional arguments only
    pub fn new(args: &'a [Value]) -> Self {
        Self { args, block: None }
    }

    /// Invocation with positional arguments and a block
    pub fn with_block(args: &'a [Value], block: Block<'a>) -> Self {
        Self {
            args,
            block: Some(block),
        }
    }
}

/// Registered implementation of an operation
pub type OpBody = Arc<dyn Fn(&Interface, &Invocation<'_>) -> Result<Value> + Send + Sync>;

/// A named, callable member of an interface
#[derive(Clone)]
pub struct Operation {
    name: String,
    kind: OpKind,
    visibility: Visibility,
    location: Option<SourceLocation>,
    body: OpBody,
}

impl Operation {
    /// Operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which table the operation lives on
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Operation visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Whether the operation is public
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Declared source location, if the operation is source-backed
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("visibility", &self.visibility)
            .field("location", &self.location)
            .finish()
    }
}

/// Record delivered to declaration observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDeclared {
    /// Name of the declared operation
    pub name: String,
    /// Table it was declared on
    pub kind: OpKind,
}

type DeclarationObserver = Arc<dyn Fn(&Interface, &OperationDeclared) + Send + Sync>;

/// A named, identity-keyed surface of dynamically registered operations
pub struct Interface {
    id: InterfaceId,
    name: String,
    instance_ops: RwLock<HashMap<String, Operation>>,
    static_ops: RwLock<HashMap<String, Operation>>,
    observers: RwLock<Vec<DeclarationObserver>>,
    /// Serializes protection installs on this interface
    install_lock: Mutex<()>,
    /// Protector this interface is bound to, set on first install
    authority: OnceLock<(InterfaceId, String)>,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instance_ops", &self.instance_ops.read().unwrap().len())
            .field("static_ops", &self.static_ops.read().unwrap().len())
            .finish()
    }
}

impl Interface {
    /// Create a new, empty interface
    pub fn new(name: impl Into<String>) -> Self {
        let iface = Self {
            id: InterfaceId::next(),
            name: name.into(),
            instance_ops: RwLock::new(HashMap::new()),
            static_ops: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            install_lock: Mutex::new(()),
            authority: OnceLock::new(),
        };
        tracing::debug!(interface = %iface.name, id = %iface.id, "Interface created");
        iface
    }

    /// Process-unique identity
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn table(&self, kind: OpKind) -> &RwLock<HashMap<String, Operation>> {
        match kind {
            OpKind::Instance => &self.instance_ops,
            OpKind::Static => &self.static_ops,
        }
    }

    /// Declare an instance-level operation
    ///
    /// The call site of this method is recorded as the operation's declared
    /// location; register closures inline so their bodies fall within the
    /// recorded statement.
    #[track_caller]
    pub fn define(
        &self,
        name: impl Into<String>,
        visibility: Visibility,
        body: impl Fn(&Interface, &Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    ) {
        let caller = Location::caller();
        let location = Some(SourceLocation::new(caller.file(), caller.line()));
        self.insert(OpKind::Instance, name.into(), visibility, location, Arc::new(body));
    }

    /// Declare a type-level ("static") operation
    #[track_caller]
    pub fn define_static(
        &self,
        name: impl Into<String>,
        visibility: Visibility,
        body: impl Fn(&Interface, &Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    ) {
        let caller = Location::caller();
        let location = Some(SourceLocation::new(caller.file(), caller.line()));
        self.insert(OpKind::Static, name.into(), visibility, location, Arc::new(body));
    }

    /// Declare an operation with an explicit (possibly absent) location
    ///
    /// An absent location marks the operation as not source-backed; it will
    /// be excluded from any protector signature rather than rejected.
    pub fn define_at(
        &self,
        kind: OpKind,
        name: impl Into<String>,
        visibility: Visibility,
        location: Option<SourceLocation>,
        body: impl Fn(&Interface, &Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.insert(kind, name.into(), visibility, location, Arc::new(body));
    }

    fn insert(
        &self,
        kind: OpKind,
        name: String,
        visibility: Visibility,
        location: Option<SourceLocation>,
        body: OpBody,
    ) {
        let op = Operation {
            name: name.clone(),
            kind,
            visibility,
            location,
            body,
        };
        {
            let mut table = self.table(kind).write().unwrap();
            table.insert(name.clone(), op);
        }
        tracing::debug!(interface = %self.name, operation = %name, ?kind, "Operation declared");
        self.notify(&OperationDeclared { name, kind });
    }

    /// Create a private alias pointing at an existing operation's current
    /// implementation
    ///
    /// This is the preservation mechanism: wrapping aliases the original
    /// before redefining the public name. Aliases fire declaration
    /// observers like any other declaration.
    pub fn alias(&self, kind: OpKind, new_name: impl Into<String>, existing: &str) -> Result<()> {
        let new_name = new_name.into();
        let cloned = {
            let table = self
                .table(kind)
                .read()
                .map_err(|e| GuardError::Lock(format!("operation table poisoned: {}", e)))?;
            table
                .get(existing)
                .cloned()
                .ok_or_else(|| GuardError::UnknownOperation {
                    interface: self.name.clone(),
                    operation: existing.to_string(),
                })?
        };
        let aliased = Operation {
            name: new_name.clone(),
            visibility: Visibility::Private,
            ..cloned
        };
        {
            let mut table = self
                .table(kind)
                .write()
                .map_err(|e| GuardError::Lock(format!("operation table poisoned: {}", e)))?;
            table.insert(new_name.clone(), aliased);
        }
        tracing::debug!(interface = %self.name, alias = %new_name, original = existing, "Operation aliased");
        self.notify(&OperationDeclared {
            name: new_name,
            kind,
        });
        Ok(())
    }

    /// Replace a declared operation's implementation in place
    ///
    /// Name, visibility, and declared location are kept; only the body is
    /// retargeted. Fires declaration observers.
    pub fn redefine(
        &self,
        kind: OpKind,
        name: &str,
        body: impl Fn(&Interface, &Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<()> {
        {
            let mut table = self
                .table(kind)
                .write()
                .map_err(|e| GuardError::Lock(format!("operation table poisoned: {}", e)))?;
            let op = table.get_mut(name).ok_or_else(|| GuardError::UnknownOperation {
                interface: self.name.clone(),
                operation: name.to_string(),
            })?;
            op.body = Arc::new(body);
        }
        tracing::debug!(interface = %self.name, operation = name, ?kind, "Operation redefined");
        self.notify(&OperationDeclared {
            name: name.to_string(),
            kind,
        });
        Ok(())
    }

    /// Whether `name` exists on the given table, regardless of visibility
    pub fn contains(&self, kind: OpKind, name: &str) -> bool {
        self.table(kind).read().unwrap().contains_key(name)
    }

    /// Visibility of `name` on the given table, if declared
    pub fn visibility(&self, kind: OpKind, name: &str) -> Option<Visibility> {
        self.table(kind).read().unwrap().get(name).map(|op| op.visibility)
    }

    /// Public operations of one table, sorted by name
    pub fn public_operations(&self, kind: OpKind) -> Vec<Operation> {
        let table = self.table(kind).read().unwrap();
        let mut ops: Vec<Operation> = table.values().filter(|op| op.is_public()).cloned().collect();
        ops.sort_by(|a, b| a.name.cmp(&b.name));
        ops
    }

    /// Subscribe to operation declarations on both tables
    ///
    /// Handlers run on the declaring thread, after the table lock is
    /// released, so they may themselves declare or rewrite operations.
    pub fn on_operation_declared(
        &self,
        handler: impl Fn(&Interface, &OperationDeclared) + Send + Sync + 'static,
    ) {
        self.observers.write().unwrap().push(Arc::new(handler));
    }

    fn notify(&self, declared: &OperationDeclared) {
        let observers: Vec<DeclarationObserver> = self.observers.read().unwrap().clone();
        for observer in observers {
            observer(self, declared);
        }
    }

    /// Call a public instance-level operation
    ///
    /// The call site is pushed on the thread call stack for the duration of
    /// the operation, labeled with the operation lexically containing the
    /// call.
    #[track_caller]
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.dispatch(OpKind::Instance, name, args, None, Location::caller())
    }

    /// Call a public instance-level operation with an attached block
    #[track_caller]
    pub fn call_with_block(&self, name: &str, args: &[Value], block: Block<'_>) -> Result<Value> {
        self.dispatch(OpKind::Instance, name, args, Some(block), Location::caller())
    }

    /// Call a public type-level operation
    #[track_caller]
    pub fn call_static(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.dispatch(OpKind::Static, name, args, None, Location::caller())
    }

    /// Call a public type-level operation with an attached block
    #[track_caller]
    pub fn call_static_with_block(
        &self,
        name: &str,
        args: &[Value],
        block: Block<'_>,
    ) -> Result<Value> {
        self.dispatch(OpKind::Static, name, args, Some(block), Location::caller())
    }

    fn dispatch(
        &self,
        kind: OpKind,
        name: &str,
        args: &[Value],
        block: Option<Block<'_>>,
        site: &'static Location<'static>,
    ) -> Result<Value> {
        let op = {
            let table = self
                .table(kind)
                .read()
                .map_err(|e| GuardError::Lock(format!("operation table poisoned: {}", e)))?;
            match table.get(name) {
                Some(op) if op.is_public() => op.clone(),
                _ => {
                    return Err(GuardError::UnknownOperation {
                        interface: self.name.clone(),
                        operation: name.to_string(),
                    })
                }
            }
        };

        let frame = StackFrame::new(site.file(), site.line(), stack::current_label());
        let _guard = stack::push(frame, self.qualified_name(kind, name));
        let invocation = Invocation { args, block };
        (op.body)(self, &invocation)
    }

    /// Invoke a table entry directly, bypassing visibility and the thread
    /// stack
    ///
    /// This is the delegation path wrappers use to reach the preserved
    /// original; the instrumentation must not show up in captured stacks.
    pub(crate) fn invoke_internal(
        &self,
        kind: OpKind,
        name: &str,
        invocation: &Invocation<'_>,
    ) -> Result<Value> {
        let op = {
            let table = self
                .table(kind)
                .read()
                .map_err(|e| GuardError::Lock(format!("operation table poisoned: {}", e)))?;
            table
                .get(name)
                .cloned()
                .ok_or_else(|| GuardError::UnknownOperation {
                    interface: self.name.clone(),
                    operation: name.to_string(),
                })?
        };
        (op.body)(self, invocation)
    }

    fn qualified_name(&self, kind: OpKind, name: &str) -> String {
        match kind {
            OpKind::Instance => format!("{}#{}", self.name, name),
            OpKind::Static => format!("{}.{}", self.name, name),
        }
    }

    pub(crate) fn install_lock(&self) -> &Mutex<()> {
        &self.install_lock
    }

    pub(crate) fn authority(&self) -> &OnceLock<(InterfaceId, String)> {
        &self.authority
    }

    /// Gate this interface's public operations behind `protector`
    ///
    /// Convenience for [`crate::protect`] with the default configuration.
    pub fn restrict_to(&self, protector: &Interface) -> Result<()> {
        crate::guard::protect(self, protector)
    }
}
