use std::ops::{Add, Div, Mul, Rem, Sub};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Gt,
    Ge,
    Eq,
}

impl BinOp {
    pub fn token(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
        }
    }

    // c++ precedence groups, lower binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Rem => 5,
            BinOp::Add | BinOp::Sub => 6,
            BinOp::Lt | BinOp::Gt | BinOp::Ge => 9,
            BinOp::Eq => 10,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    AddrOf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastKind {
    Static,
    Const,
    // (T)x
    CStyle,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgLayout {
    Inline,
    // one argument per line
    Vertical,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CppType {
    Named(String),
    Template(String, Vec<Expr>),
    Ptr { pointee: Box<CppType>, is_const: bool, restrict: Option<&'static str> },
    Ref { referent: Box<CppType>, is_const: bool },
    Auto,
}

impl CppType {
    pub fn named(name: impl Into<String>) -> Self {
        CppType::Named(name.into())
    }

    pub fn template(name: impl Into<String>, args: Vec<Expr>) -> Self {
        CppType::Template(name.into(), args)
    }

    pub fn ptr(self) -> Self {
        CppType::Ptr { pointee: Box::new(self), is_const: false, restrict: None }
    }

    pub fn const_ptr(self) -> Self {
        CppType::Ptr { pointee: Box::new(self), is_const: true, restrict: None }
    }

    /// Adds a restrict qualifier when applied to a pointer, no-op otherwise.
    pub fn restrict(self, keyword: &'static str) -> Self {
        match self {
            CppType::Ptr { pointee, is_const, .. } => CppType::Ptr { pointee, is_const, restrict: Some(keyword) },
            other => other,
        }
    }

    pub fn reference(self) -> Self {
        CppType::Ref { referent: Box::new(self), is_const: false }
    }

    pub fn const_ref(self) -> Self {
        CppType::Ref { referent: Box::new(self), is_const: true }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub ty: CppType,
    pub name: String,
}

impl Param {
    pub fn new(ty: CppType, name: impl Into<String>) -> Self {
        Self { ty, name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub captures: Vec<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    // identifiers and qualified names
    Var(String),
    // literal tokens kept as written, e.g. `0.0f`
    Lit(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Call { callee: Box<Expr>, template_args: Vec<Expr>, args: Vec<Expr>, layout: ArgLayout },
    Index(Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Cast(CastKind, CppType, Box<Expr>),
    SizeOf(CppType),
    Lambda(Lambda),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Option<BinOp>, Box<Expr>, Box<Expr>),
    PreInc(Box<Expr>),
    // `T(args)` or `T{args}`
    Construct { ty: CppType, args: Vec<Expr>, braces: bool },
    NewArray(CppType, Box<Expr>),
    // expression spliced verbatim, supplied by the template kernel context
    Raw(String),
}

pub fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

pub fn int(v: impl Into<i64>) -> Expr {
    Expr::Int(v.into())
}

pub fn lit(token: impl Into<String>) -> Expr {
    Expr::Lit(token.into())
}

pub fn string(s: impl Into<String>) -> Expr {
    Expr::Str(s.into())
}

pub fn raw(s: impl Into<String>) -> Expr {
    Expr::Raw(s.into())
}

pub fn static_cast(ty: CppType, e: Expr) -> Expr {
    Expr::Cast(CastKind::Static, ty, Box::new(e))
}

pub fn c_cast(ty: CppType, e: Expr) -> Expr {
    Expr::Cast(CastKind::CStyle, ty, Box::new(e))
}

pub fn sizeof(ty: CppType) -> Expr {
    Expr::SizeOf(ty)
}

pub fn construct(ty: CppType, args: Vec<Expr>) -> Expr {
    Expr::Construct { ty, args, braces: false }
}

pub fn brace_init(ty: CppType) -> Expr {
    Expr::Construct { ty, args: vec![], braces: true }
}

pub fn lambda(captures: &[&str], params: Vec<Param>, body: Vec<Stmt>) -> Expr {
    Expr::Lambda(Lambda { captures: captures.iter().map(|c| c.to_string()).collect(), params, body })
}

pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
}

pub fn addr_of(e: Expr) -> Expr {
    Expr::Unary(UnOp::AddrOf, Box::new(e))
}

impl Expr {
    fn binary(self, op: BinOp, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn cmp_lt(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Lt, rhs)
    }

    pub fn cmp_gt(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Gt, rhs)
    }

    pub fn cmp_ge(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Ge, rhs)
    }

    pub fn cmp_eq(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Eq, rhs)
    }

    pub fn assign(self, rhs: Expr) -> Expr {
        Expr::Assign(None, Box::new(self), Box::new(rhs))
    }

    pub fn add_assign(self, rhs: Expr) -> Expr {
        Expr::Assign(Some(BinOp::Add), Box::new(self), Box::new(rhs))
    }

    pub fn sub_assign(self, rhs: Expr) -> Expr {
        Expr::Assign(Some(BinOp::Sub), Box::new(self), Box::new(rhs))
    }

    pub fn pre_inc(self) -> Expr {
        Expr::PreInc(Box::new(self))
    }

    pub fn index(self, idx: Expr) -> Expr {
        Expr::Index(Box::new(self), Box::new(idx))
    }

    pub fn member(self, field: impl Into<String>) -> Expr {
        Expr::Member(Box::new(self), field.into())
    }

    pub fn call(self, args: Vec<Expr>) -> Expr {
        Expr::Call { callee: Box::new(self), template_args: vec![], args, layout: ArgLayout::Inline }
    }

    pub fn call_t(self, template_args: Vec<Expr>, args: Vec<Expr>) -> Expr {
        Expr::Call { callee: Box::new(self), template_args, args, layout: ArgLayout::Inline }
    }

    /// Switches a call to one-argument-per-line rendering.
    pub fn vertical(self) -> Expr {
        match self {
            Expr::Call { callee, template_args, args, .. } => {
                Expr::Call { callee, template_args, args, layout: ArgLayout::Vertical }
            }
            other => other,
        }
    }

    pub fn method(self, name: impl Into<String>, args: Vec<Expr>) -> Expr {
        self.member(name).call(args)
    }
}

macro_rules! impl_arith {
    ($($trait:ident $method:ident $op:ident),*) => {
        $(
            impl $trait for Expr {
                type Output = Expr;
                fn $method(self, rhs: Expr) -> Expr {
                    self.binary(BinOp::$op, rhs)
                }
            }
        )*
    };
}

impl_arith!(Add add Add, Sub sub Sub, Mul mul Mul, Div div Div, Rem rem Rem);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchHint {
    Likely,
    Unlikely,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Init {
    None,
    Assign(Expr),
    // direct initialization, `T x(args)`
    Ctor(Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decl {
    pub is_constexpr: bool,
    pub is_const: bool,
    pub align: Option<usize>,
    pub ty: CppType,
    pub name: String,
    pub array_len: Option<Expr>,
    pub init: Init,
}

impl Decl {
    pub fn new(ty: CppType, name: impl Into<String>) -> Self {
        Self { is_constexpr: false, is_const: false, align: None, ty, name: name.into(), array_len: None, init: Init::None }
    }

    pub fn init(mut self, e: Expr) -> Self {
        self.init = Init::Assign(e);
        self
    }

    pub fn ctor(mut self, args: Vec<Expr>) -> Self {
        self.init = Init::Ctor(args);
        self
    }

    pub fn constexpr(mut self) -> Self {
        self.is_constexpr = true;
        self
    }

    pub fn konst(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn aligned(mut self, align: usize) -> Self {
        self.align = Some(align);
        self
    }

    pub fn array(mut self, len: Expr) -> Self {
        self.array_len = Some(len);
        self
    }
}

impl From<Decl> for Stmt {
    fn from(d: Decl) -> Stmt {
        Stmt::Decl(d)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct For {
    pub pragma: Option<String>,
    pub ty: CppType,
    pub vars: Vec<(String, Expr)>,
    pub cond: Expr,
    pub steps: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Else {
    If(Box<If>),
    Block(Vec<Stmt>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct If {
    pub is_constexpr: bool,
    pub hint: Option<BranchHint>,
    pub cond: Expr,
    pub then: Vec<Stmt>,
    pub otherwise: Option<Else>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    // `None` is the default label
    pub label: Option<i64>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Decl(Decl),
    Expr(Expr),
    For(For),
    If(If),
    Switch { scrutinee: Expr, cases: Vec<Case> },
    Break,
    Comment(String),
    Using { alias: String, ty: CppType },
    // a full line provided by the kernel context, such as a pragma
    Verbatim(String),
}

impl From<Expr> for Stmt {
    fn from(e: Expr) -> Stmt {
        Stmt::Expr(e)
    }
}

pub fn comment(text: impl Into<String>) -> Stmt {
    Stmt::Comment(text.into())
}

pub fn using(alias: impl Into<String>, ty: CppType) -> Stmt {
    Stmt::Using { alias: alias.into(), ty }
}

pub fn if_(cond: Expr, then: Vec<Stmt>) -> If {
    If { is_constexpr: false, hint: None, cond, then, otherwise: None }
}

pub fn if_constexpr(cond: Expr, then: Vec<Stmt>) -> If {
    If { is_constexpr: true, hint: None, cond, then, otherwise: None }
}

impl If {
    pub fn hint(mut self, hint: BranchHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn otherwise(mut self, body: Vec<Stmt>) -> Self {
        self.otherwise = Some(Else::Block(body));
        self
    }

    /// Builds an `if / else if` chain from the branches, in order.
    pub fn chain(branches: Vec<If>) -> Option<If> {
        let mut iter = branches.into_iter().rev();
        let mut acc = iter.next()?;
        for mut prev in iter {
            prev.otherwise = Some(Else::If(Box::new(acc)));
            acc = prev;
        }
        Some(acc)
    }
}

impl From<If> for Stmt {
    fn from(i: If) -> Stmt {
        Stmt::If(i)
    }
}

/// `for (ty var = start; cond; step)`
pub fn for_(ty: CppType, var_name: &str, start: Expr, cond: Expr, step: Expr, body: Vec<Stmt>) -> For {
    For { pragma: None, ty, vars: vec![(var_name.to_string(), start)], cond, steps: vec![step], body }
}

impl For {
    pub fn pragma(mut self, pragma: impl Into<String>) -> Self {
        self.pragma = Some(pragma.into());
        self
    }
}

impl From<For> for Stmt {
    fn from(f: For) -> Stmt {
        Stmt::For(f)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub template_params: Option<Vec<Param>>,
    pub is_inline: bool,
    pub ret: CppType,
    pub name: String,
    pub params: Vec<Param>,
    // `None` renders a declaration only
    pub body: Option<Vec<Stmt>>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self { template_params: None, is_inline: true, ret: CppType::named("void"), name: name.into(), params, body: None }
    }

    pub fn template(mut self, params: Vec<Param>) -> Self {
        self.template_params = Some(params);
        self
    }

    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Include(String),
    Function(Function),
}
