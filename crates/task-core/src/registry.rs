//! `Registry`: vincula nombres de tarea con handlers.
//!
//! En un host dinámicamente tipado el registro inverso (handler → nombre) se
//! construye sobre la identidad del objeto función. Rust no tiene identidad
//! de objeto para funciones libres, pero cada `fn`/closure sin estado
//! capturado tiene un tipo único en tiempo de compilación, así que usamos
//! `TypeId::of::<F>()` como la llave de esa identidad, y
//! `std::any::type_name::<F>()` para derivar un nombre natural por defecto
//! cuando el llamador no provee uno.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::HandlerError;
use crate::task::TaskHandle;

/// Firma de un handler registrado: recibe el handle prestado de la tarea en
/// ejecución y el valor JSON completo de sus parámetros.
pub type HandlerFn = dyn Fn(&TaskHandle<'_>, &Value) -> Result<(), HandlerError> + Send + Sync;

/// Registro de handlers por nombre, con búsqueda inversa por tipo.
pub struct Registry {
    by_name: HashMap<String, Arc<HandlerFn>>,
    name_by_type: HashMap<TypeId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self { by_name: HashMap::new(), name_by_type: HashMap::new() }
    }

    /// Registra `handler` bajo `name`, recordando también `F`'s `TypeId` para
    /// que `name_of::<F>()` pueda recuperar el nombre más adelante.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&TaskHandle<'_>, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.name_by_type.insert(TypeId::of::<F>(), name.clone());
        self.by_name.insert(name, Arc::new(handler));
    }

    /// Registra `handler` usando su identificador natural (la última
    /// componente de `type_name::<F>()`) como nombre.
    pub fn register_unnamed<F>(&mut self, handler: F)
    where
        F: Fn(&TaskHandle<'_>, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = natural_name::<F>();
        self.register(name, handler);
    }

    /// Nombre bajo el que quedó registrado el handler de tipo `F`, si alguno.
    pub fn name_of<F: 'static>(&self) -> Option<&str> {
        self.name_by_type.get(&TypeId::of::<F>()).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<Arc<HandlerFn>> {
        self.by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn natural_name<F: 'static>() -> String {
    let full = std::any::type_name::<F>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet(_task: &TaskHandle<'_>, _params: &Value) -> Result<(), HandlerError> {
        Ok(())
    }

    fn name_of_fn<F>(registry: &Registry, _f: &F) -> Option<String>
    where
        F: Fn(&TaskHandle<'_>, &Value) -> Result<(), HandlerError> + 'static,
    {
        registry.name_of::<F>().map(str::to_string)
    }

    #[test]
    fn named_registration_round_trips() {
        let mut registry = Registry::new();
        registry.register("greet", greet);
        assert!(registry.contains("greet"));
        assert_eq!(name_of_fn(&registry, &greet).as_deref(), Some("greet"));
    }

    #[test]
    fn unnamed_registration_derives_a_name() {
        let mut registry = Registry::new();
        registry.register_unnamed(greet);
        assert!(registry.names().iter().any(|n| n.contains("greet")));
    }
}
