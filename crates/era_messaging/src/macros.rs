//! Macros for declaring bindings

/// Implements [`DeclaresBindings`](crate::DeclaresBindings) for a type from
/// a list of event and request declarations.
///
/// Each line is `event <mode>(<args>) => method(<param types>);`,
/// `request <mode>(<args>) => field;` or
/// `temp_request <mode>(<args>) => field;`, where `<mode>` is one of the
/// [`BindingDecl`](crate::BindingDecl) constructors: `global("Name")`,
/// `scoped("Scope", "Name")` or `instance("Name")`. A method may appear on
/// several lines. Event parameters are passed to the method by clone.
///
/// ```ignore
/// declare_bindings! {
///     PlayerHealth {
///         event instance("Damage") => damage(f32);
///         event global("Heal") => heal();
///         request instance("Health") => health;
///     }
/// }
/// ```
///
/// Methods with more than one parameter are accepted here and reported as
/// [`BindingError::TooManyParameters`](crate::BindingError) later.
#[macro_export]
macro_rules! declare_bindings {
    (@munch $table:ident, $ty:ty; ) => {};

    (@munch $table:ident, $ty:ty;
        event $mode:ident ( $($arg:expr),+ ) => $method:ident ( $($params:tt)* ); $($rest:tt)*
    ) => {
        $table.event(
            stringify!($method),
            $crate::BindingDecl::$mode($($arg),+),
            $crate::declare_bindings!(@invoker $ty, $method ( $($params)* )),
        );
        $crate::declare_bindings!(@munch $table, $ty; $($rest)*);
    };

    (@munch $table:ident, $ty:ty;
        request $mode:ident ( $($arg:expr),+ ) => $field:ident; $($rest:tt)*
    ) => {
        $table.request(
            stringify!($field),
            $crate::BindingDecl::$mode($($arg),+),
            $crate::declare_bindings!(@access $ty, $field),
        );
        $crate::declare_bindings!(@munch $table, $ty; $($rest)*);
    };

    (@munch $table:ident, $ty:ty;
        temp_request $mode:ident ( $($arg:expr),+ ) => $field:ident; $($rest:tt)*
    ) => {
        $table.temp_request(
            stringify!($field),
            $crate::BindingDecl::$mode($($arg),+),
            $crate::declare_bindings!(@access $ty, $field),
        );
        $crate::declare_bindings!(@munch $table, $ty; $($rest)*);
    };

    (@access $ty:ty, $field:ident) => {{
        fn access(target: &$ty) -> &dyn $crate::ObservableField {
            &target.$field
        }
        access
    }};

    (@invoker $ty:ty, $method:ident ()) => {{
        fn invoke(target: &$ty) {
            target.$method();
        }
        $crate::MethodInvoker::NoArg(invoke)
    }};

    (@invoker $ty:ty, $method:ident ( $param:ty )) => {{
        fn subscribe(
            bus: &$crate::EventBus,
            name: &str,
            owner: $crate::Owner,
            target: ::std::sync::Weak<$ty>,
        ) -> $crate::HandlerId {
            bus.subscribe_with(name, owner, move |arg: &$param| {
                if let Some(target) = target.upgrade() {
                    target.$method(::std::clone::Clone::clone(arg));
                }
            })
        }
        $crate::MethodInvoker::OneArg {
            param_type: ::std::any::type_name::<$param>(),
            subscribe,
        }
    }};

    (@invoker $ty:ty, $method:ident ( $($param:ty),+ )) => {
        $crate::MethodInvoker::Unsupported {
            params: &[$(stringify!($param)),+],
        }
    };

    ($ty:ty { $($body:tt)* }) => {
        impl $crate::DeclaresBindings for $ty {
            fn bindings() -> $crate::TypeBindings<Self> {
                #[allow(unused_mut)]
                let mut table = $crate::TypeBindings::<Self>::new(stringify!($ty));
                $crate::declare_bindings!(@munch table, $ty; $($body)*);
                table
            }
        }
    };
}
