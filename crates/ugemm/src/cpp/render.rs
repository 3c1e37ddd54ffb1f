use super::ast::*;

const INDENT: &str = "    ";

// precedence of expressions that never need parentheses
const ATOM: u8 = 0;
const POSTFIX: u8 = 2;
const PREFIX: u8 = 3;
const ASSIGN: u8 = 16;
// verbatim text is opaque, always parenthesized when nested
const OPAQUE: u8 = 17;

fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Var(_) | Expr::Lit(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Lambda(_) | Expr::SizeOf(_) => ATOM,
        Expr::Int(v) if *v < 0 => PREFIX,
        Expr::Float(v) if *v < 0.0 => PREFIX,
        Expr::Int(_) | Expr::Float(_) => ATOM,
        Expr::Construct { .. } => POSTFIX,
        Expr::Call { .. } | Expr::Index(..) | Expr::Member(..) => POSTFIX,
        Expr::Cast(CastKind::Static | CastKind::Const, ..) => POSTFIX,
        Expr::Cast(CastKind::CStyle, ..) | Expr::Unary(..) | Expr::PreInc(_) | Expr::NewArray(..) => PREFIX,
        Expr::Binary(op, ..) => op.precedence(),
        Expr::Ternary(..) | Expr::Assign(..) => ASSIGN,
        Expr::Raw(_) => OPAQUE,
    }
}

fn wrap(e: &Expr, indent: usize, parenthesize: bool) -> String {
    let s = render_expr(e, indent);
    if parenthesize {
        format!("({s})")
    } else {
        s
    }
}

// every spelling is a valid c++ literal or constant, large magnitudes use exponent form
fn render_float(v: f64) -> String {
    if v.is_nan() {
        "std::numeric_limits<double>::quiet_NaN()".to_string()
    } else if v.is_infinite() {
        let sign = if v < 0.0 { "-" } else { "" };
        format!("{sign}std::numeric_limits<double>::infinity()")
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else if v.abs() >= 1e15 || v.abs() < 1e-6 {
        format!("{v:e}")
    } else {
        format!("{v}")
    }
}

fn render_list(items: &[Expr], indent: usize) -> String {
    items.iter().map(|e| render_expr(e, indent)).collect::<Vec<_>>().join(", ")
}

pub fn render_type(ty: &CppType) -> String {
    match ty {
        CppType::Named(name) => name.clone(),
        CppType::Template(name, args) => format!("{name}<{}>", render_list(args, 0)),
        CppType::Ptr { pointee, is_const, restrict } => {
            let konst = if *is_const { "const " } else { "" };
            match restrict {
                Some(kw) => format!("{konst}{}* {kw}", render_type(pointee)),
                None => format!("{konst}{}*", render_type(pointee)),
            }
        }
        CppType::Ref { referent, is_const } => {
            let konst = if *is_const { "const " } else { "" };
            format!("{konst}{}&", render_type(referent))
        }
        CppType::Auto => "auto".to_string(),
    }
}

fn render_param(p: &Param) -> String {
    format!("{} {}", render_type(&p.ty), p.name)
}

/// Renders an expression, `indent` is the level of the line it starts on.
pub fn render_expr(e: &Expr, indent: usize) -> String {
    let prec = precedence(e);
    match e {
        Expr::Var(name) => name.clone(),
        Expr::Lit(tok) | Expr::Raw(tok) => tok.clone(),
        Expr::Int(v) => v.to_string(),
        Expr::Float(v) => render_float(*v),
        Expr::Bool(b) => b.to_string(),
        Expr::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Expr::Binary(op, lhs, rhs) => {
            let l = wrap(lhs, indent, precedence(lhs) > prec);
            let r = wrap(rhs, indent, precedence(rhs) >= prec);
            format!("{l} {} {r}", op.token())
        }
        Expr::Unary(UnOp::AddrOf, operand) => format!("&{}", wrap(operand, indent, precedence(operand) > PREFIX)),
        Expr::Call { callee, template_args, args, layout } => {
            let mut out = wrap(callee, indent, precedence(callee) > POSTFIX);
            if !template_args.is_empty() {
                out.push('<');
                out.push_str(&render_list(template_args, indent));
                out.push('>');
            }
            match layout {
                ArgLayout::Inline => {
                    out.push('(');
                    out.push_str(&render_list(args, indent));
                    out.push(')');
                }
                ArgLayout::Vertical => {
                    let pad = INDENT.repeat(indent);
                    let inner = INDENT.repeat(indent + 1);
                    out.push_str("(\n");
                    for (i, arg) in args.iter().enumerate() {
                        out.push_str(&inner);
                        out.push_str(&render_expr(arg, indent + 1));
                        if i + 1 < args.len() {
                            out.push(',');
                        }
                        out.push('\n');
                    }
                    out.push_str(&pad);
                    out.push(')');
                }
            }
            out
        }
        Expr::Index(base, idx) => {
            format!("{}[{}]", wrap(base, indent, precedence(base) > POSTFIX), render_expr(idx, indent))
        }
        Expr::Member(base, field) => format!("{}.{field}", wrap(base, indent, precedence(base) > POSTFIX)),
        Expr::Cast(kind, ty, operand) => match kind {
            CastKind::Static => format!("static_cast<{}>({})", render_type(ty), render_expr(operand, indent)),
            CastKind::Const => format!("const_cast<{}>({})", render_type(ty), render_expr(operand, indent)),
            CastKind::CStyle => {
                format!("({}){}", render_type(ty), wrap(operand, indent, precedence(operand) > PREFIX))
            }
        },
        Expr::SizeOf(ty) => format!("sizeof({})", render_type(ty)),
        Expr::Lambda(l) => render_lambda(l, indent),
        Expr::Ternary(cond, then, otherwise) => format!(
            "{} ? {} : {}",
            wrap(cond, indent, precedence(cond) >= ASSIGN),
            render_expr(then, indent),
            wrap(otherwise, indent, precedence(otherwise) > ASSIGN)
        ),
        Expr::Assign(op, lhs, rhs) => {
            let tok = op.map(|op| format!("{}=", op.token())).unwrap_or_else(|| "=".to_string());
            format!("{} {tok} {}", wrap(lhs, indent, precedence(lhs) >= ASSIGN), render_expr(rhs, indent))
        }
        Expr::PreInc(operand) => format!("++{}", wrap(operand, indent, precedence(operand) > PREFIX)),
        Expr::Construct { ty, args, braces } => {
            if *braces {
                format!("{}{{{}}}", render_type(ty), render_list(args, indent))
            } else {
                format!("{}({})", render_type(ty), render_list(args, indent))
            }
        }
        Expr::NewArray(ty, len) => format!("new {}[{}]", render_type(ty), render_expr(len, indent)),
    }
}

fn render_lambda(l: &Lambda, indent: usize) -> String {
    let head = format!(
        "[{}]({})",
        l.captures.join(", "),
        l.params.iter().map(render_param).collect::<Vec<_>>().join(", ")
    );
    // single expression bodies stay on one line
    if let [Stmt::Expr(e)] = l.body.as_slice() {
        return format!("{head} {{ {}; }}", render_expr(e, indent));
    }
    let mut w = CodeWriter::with_indent(indent + 1);
    w.stmts(&l.body);
    format!("{head} {{\n{}{}}}", w.finish(), INDENT.repeat(indent))
}

/// Indentation aware sink for statements and functions.
#[derive(Default)]
pub struct CodeWriter {
    buf: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indent(indent: usize) -> Self {
        Self { buf: String::new(), indent }
    }

    pub fn writeline(&mut self, line: &str) {
        if !line.is_empty() {
            for _ in 0..self.indent {
                self.buf.push_str(INDENT);
            }
            self.buf.push_str(line);
        }
        self.buf.push('\n');
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self)) {
        self.indent += 1;
        f(self);
        self.indent -= 1;
    }

    fn expr(&self, e: &Expr) -> String {
        render_expr(e, self.indent)
    }

    pub fn stmts(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            self.stmt(s);
        }
    }

    pub fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl(d) => {
                let line = self.decl(d);
                self.writeline(&format!("{line};"));
            }
            Stmt::Expr(e) => {
                let line = self.expr(e);
                self.writeline(&format!("{line};"));
            }
            Stmt::For(f) => {
                if let Some(pragma) = &f.pragma {
                    self.writeline(pragma);
                }
                let ty = render_type(&f.ty);
                let vars =
                    f.vars.iter().map(|(name, init)| format!("{name} = {}", self.expr(init))).collect::<Vec<_>>();
                let steps = f.steps.iter().map(|s| self.expr(s)).collect::<Vec<_>>();
                let head = format!("for ({ty} {}; {}; {}) {{", vars.join(", "), self.expr(&f.cond), steps.join(", "));
                self.writeline(&head);
                self.indented(|w| w.stmts(&f.body));
                self.writeline("}");
            }
            Stmt::If(i) => {
                let head = self.if_head(i);
                self.writeline(&head);
                self.if_tail(i);
            }
            Stmt::Switch { scrutinee, cases } => {
                let head = format!("switch ({}) {{", self.expr(scrutinee));
                self.writeline(&head);
                for case in cases {
                    match case.label {
                        Some(label) => self.writeline(&format!("case {label}:")),
                        None => self.writeline("default:"),
                    }
                    self.indented(|w| w.stmts(&case.body));
                }
                self.writeline("}");
            }
            Stmt::Break => self.writeline("break;"),
            Stmt::Comment(text) => self.writeline(&format!("// {text}")),
            Stmt::Using { alias, ty } => self.writeline(&format!("using {alias} = {};", render_type(ty))),
            Stmt::Verbatim(line) => self.writeline(line),
        }
    }

    fn decl(&self, d: &Decl) -> String {
        let mut out = String::new();
        if let Some(align) = d.align {
            out.push_str(&format!("alignas({align}) "));
        }
        if d.is_constexpr {
            out.push_str("constexpr ");
        }
        if d.is_const {
            out.push_str("const ");
        }
        out.push_str(&render_type(&d.ty));
        out.push(' ');
        out.push_str(&d.name);
        if let Some(len) = &d.array_len {
            out.push_str(&format!("[{}]", self.expr(len)));
        }
        match &d.init {
            Init::None => {}
            Init::Assign(e) => out.push_str(&format!(" = {}", self.expr(e))),
            Init::Ctor(args) => out.push_str(&format!("({})", render_list(args, self.indent))),
        }
        out
    }

    fn if_head(&self, i: &If) -> String {
        let mut head = String::from("if ");
        if i.is_constexpr {
            head.push_str("constexpr ");
        }
        match i.hint {
            Some(BranchHint::Likely) => head.push_str("C10_LIKELY "),
            Some(BranchHint::Unlikely) => head.push_str("C10_UNLIKELY "),
            None => {}
        }
        head.push_str(&format!("({}) {{", self.expr(&i.cond)));
        head
    }

    fn if_tail(&mut self, i: &If) {
        self.indented(|w| w.stmts(&i.then));
        match &i.otherwise {
            None => self.writeline("}"),
            Some(Else::Block(body)) => {
                self.writeline("} else {");
                self.indented(|w| w.stmts(body));
                self.writeline("}");
            }
            Some(Else::If(next)) => {
                let head = format!("}} else {}", self.if_head(next));
                self.writeline(&head);
                self.if_tail(next);
            }
        }
    }

    pub fn function(&mut self, f: &Function) {
        if let Some(params) = &f.template_params {
            let params = params.iter().map(render_param).collect::<Vec<_>>().join(", ");
            self.writeline(&format!("template <{params}>"));
        }
        let inline = if f.is_inline { "inline " } else { "" };
        if f.params.is_empty() {
            self.writeline(&format!("{inline}{} {}()", render_type(&f.ret), f.name));
        } else {
            self.writeline(&format!("{inline}{} {}(", render_type(&f.ret), f.name));
            self.indented(|w| {
                for (i, p) in f.params.iter().enumerate() {
                    let sep = if i + 1 < f.params.len() { "," } else { "" };
                    w.writeline(&format!("{}{sep}", render_param(p)));
                }
            });
            self.writeline(")");
        }
        if let Some(body) = &f.body {
            // reopen the closing line to attach the brace
            self.buf.pop();
            self.buf.push_str(" {\n");
            self.indented(|w| w.stmts(body));
            self.writeline("}");
        }
    }

    pub fn item(&mut self, item: &Item) {
        match item {
            Item::Include(header) => self.writeline(&format!("#include <{header}>")),
            Item::Function(f) => self.function(f),
        }
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Renders a fragment of a translation unit, functions separated by a blank line.
pub fn render_items(items: &[Item]) -> String {
    let mut w = CodeWriter::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 && matches!(item, Item::Function(_)) {
            w.writeline("");
        }
        w.item(item);
    }
    w.finish()
}
